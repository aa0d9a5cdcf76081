//! Subsystems the plugin links against but whose behavior the harness fakes.
//!
//! Each subsystem is a trait whose default methods are the trivial behavior a
//! fuzz target wants: succeed, do nothing, or answer with a fixed value.
//! [`Noop`] takes every default; [`Capabilities`] bundles one implementation of
//! each so tests and embedders can swap in their own.

use crate::context::Passwd;
use std::fmt;
use std::io;
use tracing::warn;

/// Lookup result meaning the user is allowed by the rules.
pub const VALIDATE_SUCCESS: i32 = 0x002;

/// Identity the process should switch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perm {
    Initial,
    Root,
    User,
    FullUser,
    Sudoers,
    Runas,
    Timestamp,
    Iolog,
}

pub trait PermissionSwitch {
    fn set_perms(&self, _perm: Perm) -> bool {
        true
    }
    fn restore_perms(&self) -> bool {
        true
    }
    fn rewind_perms(&self) -> bool {
        true
    }
}

/// Authentication, session and audit hooks.
pub trait SessionAuditor {
    fn user_is_exempt(&self) -> bool {
        false
    }
    fn check_user(&self, _validated: i32, _mode: i32) -> bool {
        true
    }
    fn check_user_shell(&self, _pw: &Passwd) -> bool {
        true
    }
    fn begin_session(&self, _pw: &Passwd, _user_env: &mut Vec<String>) -> i32 {
        1
    }
    fn end_session(&self, _pw: &Passwd) -> i32 {
        1
    }
    fn needs_end_session(&self) -> bool {
        false
    }
    fn timestamp_remove(&self, _unlink_it: bool) -> bool {
        true
    }
    fn create_admin_success_flag(&self) -> bool {
        true
    }
    fn log_denial(&self, _status: i32, _inform_user: bool) -> bool {
        true
    }
    fn log_failure(&self, _status: i32, _flags: i32) -> bool {
        true
    }
    fn audit_failure(&self, _argv: &[String], _msg: fmt::Arguments<'_>) -> i32 {
        0
    }
}

/// Turns a command name into a path.
pub trait CommandResolver {
    /// Absolute names resolve to themselves, bare names under `/usr/bin`.
    fn find_path(&self, infile: &str) -> Option<String> {
        if infile.starts_with('/') {
            Some(infile.to_string())
        } else {
            Some(format!("/usr/bin/{infile}"))
        }
    }
}

/// I/O log path handling.
pub trait IologPaths {
    /// Copies `inpath` if it fits in a buffer of `pathlen` bytes (NUL included).
    fn expand_iolog_path(&self, inpath: &str, pathlen: usize) -> Option<String> {
        (inpath.len() < pathlen).then(|| inpath.to_string())
    }
    fn iolog_nextid(&self, _iolog_dir: &str) -> String {
        "000001".to_string()
    }
}

/// A single event-log configuration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventLogSetting<'a> {
    Type(i32),
    Format(EventLogFormat),
    SyslogAcceptPri(i32),
    SyslogRejectPri(i32),
    SyslogAlertPri(i32),
    SyslogMaxLen(i32),
    FileMaxLen(i32),
    MailUid(u32),
    OmitHostname(bool),
    LogPath(&'a str),
    TimeFormat(&'a str),
    MailerPath(&'a str),
    MailerFlags(&'a str),
    MailFrom(&'a str),
    MailTo(&'a str),
    MailSubject(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLogFormat {
    Sudo,
    Json,
}

pub trait EventLogSink {
    fn init_config(&self) {}
    fn configure(&self, _setting: EventLogSetting<'_>) {}
}

pub trait GroupPlugin {
    fn query(&self, _user: &str, _group: &str, _pw: Option<&Passwd>) -> bool {
        false
    }
    fn unload(&self) {}
}

pub trait NetInterfaces {
    fn interfaces(&self) -> Vec<String> {
        Vec::new()
    }
    fn set_interfaces(&self, _ai: &str) -> bool {
        true
    }
    fn dump_interfaces(&self, _ai: &str) {}
    fn dump_auth_methods(&self) {}
}

/// Callbacks run when particular defaults are set.
pub trait DefaultsCallbacks {
    fn cb_maxseq(&self, _value: &str) -> bool {
        true
    }
    fn cb_iolog_user(&self, _value: &str) -> bool {
        true
    }
    fn cb_iolog_group(&self, _value: &str) -> bool {
        true
    }
    fn cb_iolog_mode(&self, _value: &str) -> bool {
        true
    }
    fn cb_group_plugin(&self, _value: &str) -> bool {
        true
    }
}

/// Plugin warnings. The defaults just display them through `tracing`.
pub trait WarningLog {
    /// Appends the last OS error, like `warn(3)`.
    fn log_warning(&self, flags: i32, msg: fmt::Arguments<'_>) -> bool {
        let os_error = io::Error::last_os_error();
        warn!(flags, "{msg}: {os_error}");
        true
    }
    fn log_warningx(&self, flags: i32, msg: fmt::Arguments<'_>) -> bool {
        warn!(flags, "{msg}");
        true
    }
    /// `errnum` is ignored.
    fn gai_log_warning(&self, flags: i32, _errnum: i32, msg: fmt::Arguments<'_>) -> bool {
        warn!(flags, "{msg}");
        true
    }
}

/// Takes the default behavior of every subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct Noop;

impl PermissionSwitch for Noop {}
impl SessionAuditor for Noop {}
impl CommandResolver for Noop {}
impl IologPaths for Noop {}
impl EventLogSink for Noop {}
impl GroupPlugin for Noop {}
impl NetInterfaces for Noop {}
impl DefaultsCallbacks for Noop {}
impl WarningLog for Noop {}

/// A parsed rule set. The file backend always parses to an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseTree {
    pub userspecs: Vec<String>,
    pub defaults: Vec<String>,
}

/// A rule source.
pub trait NssBackend {
    fn name(&self) -> &'static str;
    fn open(&mut self) -> i32 {
        0
    }
    fn close(&mut self) -> i32 {
        0
    }
    fn parse(&mut self) -> &ParseTree;
    fn query(&mut self, _pw: &Passwd) -> i32 {
        0
    }
    fn getdefs(&mut self) -> i32 {
        0
    }
}

#[derive(Debug, Default)]
pub struct FileNss {
    tree: ParseTree,
}

impl NssBackend for FileNss {
    fn name(&self) -> &'static str {
        "file"
    }

    fn parse(&mut self) -> &ParseTree {
        &self.tree
    }
}

/// The ordered list of rule sources.
#[derive(Default)]
pub struct NssList {
    backends: Vec<Box<dyn NssBackend>>,
}

impl NssList {
    /// Returns the backends, installing the file backend on first use.
    pub fn read(&mut self) -> &mut [Box<dyn NssBackend>] {
        if self.backends.is_empty() {
            self.backends.push(Box::new(FileNss::default()));
        }
        &mut self.backends
    }

    pub fn lookup(&mut self, _pw: &Passwd, _pwflag: i32) -> i32 {
        VALIDATE_SUCCESS
    }

    pub fn display_cmnd(&mut self, _pw: &Passwd) -> bool {
        true
    }

    pub fn display_privs(&mut self, _pw: &Passwd, _verbose: bool) -> bool {
        true
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for NssList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}

/// One implementation of every faked subsystem.
pub struct Capabilities {
    pub perms: Box<dyn PermissionSwitch>,
    pub session: Box<dyn SessionAuditor>,
    pub resolver: Box<dyn CommandResolver>,
    pub iolog: Box<dyn IologPaths>,
    pub eventlog: Box<dyn EventLogSink>,
    pub group_plugin: Box<dyn GroupPlugin>,
    pub interfaces: Box<dyn NetInterfaces>,
    pub defaults: Box<dyn DefaultsCallbacks>,
    pub warnings: Box<dyn WarningLog>,
    pub nss: NssList,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            perms: Box::new(Noop),
            session: Box::new(Noop),
            resolver: Box::new(Noop),
            iolog: Box::new(Noop),
            eventlog: Box::new(Noop),
            group_plugin: Box::new(Noop),
            interfaces: Box::new(Noop),
            defaults: Box::new(Noop),
            warnings: Box::new(Noop),
            nss: NssList::default(),
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("nss", &self.nss)
            .finish_non_exhaustive()
    }
}
