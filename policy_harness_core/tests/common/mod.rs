//! Test doubles for the integration tests.

use policy_harness_core::context::PolicyContext;
use policy_harness_core::plugin::{
    ApiVersion, CheckArgs, CheckOutput, CheckReply, OpenArgs, OpenReply, PolicyPlugin,
};
use policy_harness_core::relay::{ConvMessage, Conversation};
use std::cell::RefCell;
use std::ffi::CString;
use std::io::{self, Write};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginCall {
    Open,
    Check,
    Close { exit_status: i32, signal: i32 },
}

/// The vectors as last seen by the plugin, decoded to strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Seen {
    pub api_version: Option<ApiVersion>,
    pub settings: Option<Vec<String>>,
    pub user_info: Option<Vec<String>>,
    pub plugin_args: Option<Vec<String>>,
    pub environ: Vec<String>,
    pub argv: Vec<String>,
    pub env_add: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct RecordingPlugin {
    pub open_code: i32,
    pub check_code: i32,
    pub provides_close: bool,
    /// Fill the user state from `user=`/`uid=` and take identity handles on open.
    pub populate_user: bool,
    /// Emit an info message through the conversation relay on open.
    pub greet: bool,
    pub calls: Vec<PluginCall>,
    pub seen: Seen,
}

impl Default for RecordingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPlugin {
    pub fn new() -> Self {
        Self {
            open_code: 1,
            check_code: 1,
            provides_close: true,
            populate_user: false,
            greet: false,
            calls: Vec::new(),
            seen: Seen::default(),
        }
    }

    pub fn open_returning(mut self, code: i32) -> Self {
        self.open_code = code;
        self
    }

    pub fn check_returning(mut self, code: i32) -> Self {
        self.check_code = code;
        self
    }

    pub fn without_close(mut self) -> Self {
        self.provides_close = false;
        self
    }

    pub fn populating_user(mut self) -> Self {
        self.populate_user = true;
        self
    }

    pub fn greeting(mut self) -> Self {
        self.greet = true;
        self
    }
}

fn strings(vec: &[CString]) -> Vec<String> {
    vec.iter()
        .map(|s| s.to_string_lossy().into_owned())
        .collect()
}

fn value<'a>(entries: &'a [String], key: &str) -> Option<&'a str> {
    entries.iter().find_map(|e| e.strip_prefix(key))
}

impl PolicyPlugin for RecordingPlugin {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn open(&mut self, ctx: &mut PolicyContext, args: OpenArgs<'_>) -> OpenReply {
        self.calls.push(PluginCall::Open);
        self.seen.api_version = Some(args.api_version);
        self.seen.settings = args.settings.map(strings);
        self.seen.user_info = args.user_info.map(strings);
        self.seen.plugin_args = args.plugin_args.map(strings);
        self.seen.environ = strings(args.environ);

        if self.greet {
            let _ = args.conversation.converse(&[ConvMessage::info("opened")]);
        }

        if self.populate_user {
            let user_info = self.seen.user_info.clone().unwrap_or_default();
            let name = value(&user_info, "user=").unwrap_or("nobody").to_string();
            let uid = value(&user_info, "uid=")
                .and_then(|v| v.parse().ok())
                .unwrap_or(65534);
            ctx.user.pw = Some(ctx.identities.passwd(&name, uid, uid));
            ctx.user.gid_list = Some(ctx.identities.gid_list(&name, &[uid]));
            ctx.user.runas_pw = Some(ctx.identities.passwd("root", 0, 0));
            ctx.user.runas_gr = Some(ctx.identities.group("root", 0));
            ctx.user.name = Some(name);
            ctx.user.uid = uid;
            ctx.user.gids = vec![uid];
            ctx.user.cwd = value(&user_info, "cwd=").map(str::to_string);
            ctx.env.init(Some(args.environ));
        }
        OpenReply::new(self.open_code)
    }

    fn check_policy(&mut self, ctx: &mut PolicyContext, args: CheckArgs<'_>) -> CheckReply {
        self.calls.push(PluginCall::Check);
        self.seen.argv = strings(args.argv);
        self.seen.env_add = args.env_add.map(strings);
        if self.populate_user {
            ctx.user.cmnd = self.seen.argv.first().cloned();
            ctx.user.cmnd_args = Some(self.seen.argv.get(1..).unwrap_or_default().join(" "));
        }
        CheckReply::new(
            self.check_code,
            CheckOutput {
                command_info: vec![format!("command={}", self.seen.argv.join(" "))],
                argv_out: self.seen.argv.clone(),
                user_env_out: self.seen.env_add.clone().unwrap_or_default(),
            },
        )
    }

    fn has_close(&self) -> bool {
        self.provides_close
    }

    fn close(&mut self, _ctx: &mut PolicyContext, exit_status: i32, signal: i32) {
        self.calls.push(PluginCall::Close {
            exit_status,
            signal,
        });
    }
}

/// A cloneable in-memory writer, handy for capturing relay output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
