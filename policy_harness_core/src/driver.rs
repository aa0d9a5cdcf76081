use crate::classifier::Collections;
use crate::context::PolicyContext;
use crate::plugin::{
    ApiVersion, CheckArgs, CheckOutput, CheckStatus, OpenArgs, OpenStatus, PolicyPlugin,
};
use crate::relay::{Conversation, Printf};
use serde::Deserialize;
use std::ffi::{CString, OsString};
use std::rc::Rc;
use tracing::{debug, warn};

/// Fixed inputs of the open/check/close sequence.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DriverSettings {
    #[serde(default)]
    pub api_version: ApiVersion,
    /// Command checked when the input names none.
    #[serde(default = "default_command")]
    pub default_command: String,
    #[serde(default)]
    pub close_exit_status: i32,
    #[serde(default)]
    pub close_signal: i32,
}

pub fn default_command() -> String {
    "/usr/bin/id".to_string()
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            api_version: ApiVersion::default(),
            default_command: default_command(),
            close_exit_status: 0,
            close_signal: 0,
        }
    }
}

/// Where the sequence stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Opened,
    Checked,
    Closed,
    /// Open reported a fatal or usage error; nothing else was called.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub output: CheckOutput,
    pub errstr: Option<String>,
    pub argc: usize,
    pub default_command_used: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleOutcome {
    pub open: OpenStatus,
    pub open_errstr: Option<String>,
    pub check: Option<CheckResult>,
    pub closed: bool,
    pub state: LifecycleState,
}

/// Drives a plugin through open, an optional check, and close.
pub struct LifecycleDriver {
    settings: DriverSettings,
    conversation: Rc<dyn Conversation>,
    printf: Rc<dyn Printf>,
    environ: Vec<CString>,
}

impl LifecycleDriver {
    /// Uses the process environment as the inherited environment.
    pub fn new(
        settings: DriverSettings,
        conversation: Rc<dyn Conversation>,
        printf: Rc<dyn Printf>,
    ) -> Self {
        Self {
            settings,
            conversation,
            printf,
            environ: inherited_environ(),
        }
    }

    pub fn with_environ(mut self, environ: Vec<CString>) -> Self {
        self.environ = environ;
        self
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn environ(&self) -> &[CString] {
        &self.environ
    }

    /// Runs one open/check/close sequence over `collections`.
    ///
    /// May push the default command into `collections.argv`; everything else in
    /// `collections` is only read.
    pub fn drive<P>(
        &self,
        plugin: &mut P,
        ctx: &mut PolicyContext,
        collections: &mut Collections,
    ) -> LifecycleOutcome
    where
        P: PolicyPlugin + ?Sized,
    {
        let reply = plugin.open(
            ctx,
            OpenArgs {
                api_version: self.settings.api_version,
                conversation: Rc::clone(&self.conversation),
                printf: Rc::clone(&self.printf),
                settings: collections.settings.as_slice(),
                user_info: collections.user_info.as_slice(),
                environ: &self.environ,
                plugin_args: collections.plugin_args.as_slice(),
            },
        );
        let open = OpenStatus::from_code(reply.code);
        debug!(plugin = plugin.name(), ?open, errstr = ?reply.errstr, "policy open returned");

        let mut outcome = LifecycleOutcome {
            open,
            open_errstr: reply.errstr,
            check: None,
            closed: false,
            state: LifecycleState::Opened,
        };

        match open {
            OpenStatus::Failure => {}
            OpenStatus::Success => {
                outcome.check = self.check(plugin, ctx, collections);
                if outcome.check.is_some() {
                    outcome.state = LifecycleState::Checked;
                }
            }
            OpenStatus::Fatal(_) => {
                outcome.state = LifecycleState::Abandoned;
                return outcome;
            }
        }

        if plugin.has_close() {
            plugin.close(
                ctx,
                self.settings.close_exit_status,
                self.settings.close_signal,
            );
            outcome.closed = true;
            outcome.state = LifecycleState::Closed;
        }
        outcome
    }

    fn check<P>(
        &self,
        plugin: &mut P,
        ctx: &mut PolicyContext,
        collections: &mut Collections,
    ) -> Option<CheckResult>
    where
        P: PolicyPlugin + ?Sized,
    {
        let mut default_command_used = false;
        if collections.argv.is_empty() {
            if let Err(e) = collections
                .argv
                .push(Some(self.settings.default_command.as_bytes()))
            {
                warn!(error = %e, "could not add default command, skipping check");
                return None;
            }
            default_command_used = true;
        }

        let argv = collections.argv.as_slice().unwrap_or_default();
        let reply = plugin.check_policy(
            ctx,
            CheckArgs {
                argv,
                env_add: collections.env_add.as_slice(),
            },
        );
        let status = CheckStatus::from_code(reply.code);
        debug!(plugin = plugin.name(), ?status, argc = argv.len(), "policy check returned");

        Some(CheckResult {
            status,
            output: reply.output,
            errstr: reply.errstr,
            argc: argv.len(),
            default_command_used,
        })
    }
}

/// The process environment as `NAME=value` C strings.
pub fn inherited_environ() -> Vec<CString> {
    std::env::vars_os()
        .filter_map(|(name, value)| {
            let mut entry = os_bytes(name);
            entry.push(b'=');
            entry.extend(os_bytes(value));
            CString::new(entry).ok()
        })
        .collect()
}

#[cfg(unix)]
fn os_bytes(s: OsString) -> Vec<u8> {
    use std::os::unix::ffi::OsStringExt;
    s.into_vec()
}

#[cfg(not(unix))]
fn os_bytes(s: OsString) -> Vec<u8> {
    s.to_string_lossy().into_owned().into_bytes()
}
