//! A policy plugin that fills in the user state from its inputs and allows
//! everything.
//!
//! It exercises the same context, capability and relay surface a real rule
//! engine would, so the harness can run end to end without one.

use crate::capabilities::{EventLogFormat, EventLogSetting, Perm};
use crate::classifier::{ARGV_KEY, ENV_KEY};
use crate::context::{PolicyContext, UserState};
use crate::plugin::{
    ApiVersion, CheckArgs, CheckOutput, CheckReply, OpenArgs, OpenReply, PolicyPlugin,
};
use crate::relay::{CONV_ERROR_MSG, ConvMessage, Conversation, Printf};
use std::ffi::CString;
use std::rc::Rc;
use tracing::{debug, trace};

const IOLOG_DIR: &str = "/var/log/sudo-io";
const PATH_MAX: usize = 4096;

/// Values taken from the plugin-argument vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PluginArgs {
    pub sudoers_mode: Option<u32>,
    pub sudoers_uid: Option<u32>,
    pub sudoers_gid: Option<u32>,
}

impl PluginArgs {
    /// Parses the numeric arguments. The error names the offending entry.
    pub fn parse(entries: &[String]) -> Result<Self, String> {
        let mut args = Self::default();
        for entry in entries {
            if let Some(v) = entry.strip_prefix("sudoers_mode=") {
                args.sudoers_mode = Some(
                    u32::from_str_radix(v, 8).map_err(|_| format!("invalid {entry}"))?,
                );
            } else if let Some(v) = entry.strip_prefix("sudoers_uid=") {
                args.sudoers_uid = Some(v.parse().map_err(|_| format!("invalid {entry}"))?);
            } else if let Some(v) = entry.strip_prefix("sudoers_gid=") {
                args.sudoers_gid = Some(v.parse().map_err(|_| format!("invalid {entry}"))?);
            }
        }
        Ok(args)
    }
}

/// How often each entry point ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopbackStats {
    pub opens: u64,
    pub checks: u64,
    pub closes: u64,
}

#[derive(Default)]
pub struct LoopbackPolicy {
    conversation: Option<Rc<dyn Conversation>>,
    printf: Option<Rc<dyn Printf>>,
    plugin_args: PluginArgs,
    stats: LoopbackStats,
}

impl LoopbackPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> LoopbackStats {
        self.stats
    }

    pub fn plugin_args(&self) -> PluginArgs {
        self.plugin_args
    }

    fn report_error(&self, msg: &str) {
        if let Some(printf) = &self.printf {
            if let Err(e) = printf.printf(CONV_ERROR_MSG, format_args!("{msg}\n")) {
                debug!(error = %e, "printf relay refused message");
            }
        }
    }

    fn inform(&self, msg: String) {
        self.converse(ConvMessage::info(msg));
    }

    fn inform_error(&self, msg: &str) {
        self.converse(ConvMessage::error(msg));
    }

    fn converse(&self, msg: ConvMessage) {
        if let Some(conversation) = &self.conversation {
            if let Err(e) = conversation.converse(&[msg]) {
                debug!(error = %e, "conversation relay refused message");
            }
        }
    }
}

fn strings(vec: Option<&[CString]>) -> Vec<String> {
    vec.unwrap_or_default()
        .iter()
        .map(|s| s.to_string_lossy().into_owned())
        .collect()
}

fn value<'a>(entries: &'a [String], key: &str) -> Option<&'a str> {
    entries.iter().find_map(|e| e.strip_prefix(key))
}

fn number<T: std::str::FromStr>(entries: &[String], key: &str) -> Option<T> {
    value(entries, key).and_then(|v| v.parse().ok())
}

fn short_host(host: &str) -> String {
    host.split('.').next().unwrap_or(host).to_string()
}

/// Copies the invoking user's description into `user`.
///
/// Returns `None` when `user=` or `uid=` is missing or malformed.
fn fill_user(user: &mut UserState, user_info: &[String]) -> Option<(String, u32, u32)> {
    let name = value(user_info, "user=").filter(|n| !n.is_empty())?;
    let uid: u32 = number(user_info, "uid=")?;
    let gid: u32 = number(user_info, "gid=").unwrap_or(uid);

    user.name = Some(name.to_string());
    user.uid = uid;
    user.gid = gid;
    user.gids = value(user_info, "groups=")
        .map(|groups| groups.split(',').filter_map(|g| g.parse().ok()).collect())
        .unwrap_or_else(|| vec![gid]);
    user.cwd = value(user_info, "cwd=").map(str::to_string);
    if let Some(tty) = value(user_info, "tty=") {
        user.ttypath = Some(tty.to_string());
        user.tty = Some(tty.strip_prefix("/dev/").unwrap_or(tty).to_string());
    }
    if let Some(host) = value(user_info, "host=") {
        user.host = Some(host.to_string());
        user.shost = Some(short_host(host));
        user.runhost = user.host.clone();
        user.srunhost = user.shost.clone();
    }
    user.lines = number(user_info, "lines=").unwrap_or(0);
    user.cols = number(user_info, "cols=").unwrap_or(0);
    user.sid = number(user_info, "sid=").unwrap_or(0);
    user.umask = value(user_info, "umask=")
        .and_then(|v| u32::from_str_radix(v, 8).ok())
        .unwrap_or(0o022);
    Some((name.to_string(), uid, gid))
}

impl PolicyPlugin for LoopbackPolicy {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn open(&mut self, ctx: &mut PolicyContext, args: OpenArgs<'_>) -> OpenReply {
        self.stats.opens += 1;
        self.conversation = Some(Rc::clone(&args.conversation));
        self.printf = Some(Rc::clone(&args.printf));

        if args.api_version.major != ApiVersion::CURRENT.major {
            let msg = format!("incompatible policy plugin major version {}", args.api_version);
            self.report_error(&msg);
            return OpenReply::with_error(-1, msg);
        }

        self.plugin_args = match PluginArgs::parse(&strings(args.plugin_args)) {
            Ok(parsed) => parsed,
            Err(msg) => {
                self.report_error(&msg);
                return OpenReply::with_error(-1, msg);
            }
        };

        let caps = &ctx.capabilities;
        caps.eventlog.init_config();
        caps.eventlog.configure(EventLogSetting::Format(EventLogFormat::Sudo));
        caps.eventlog.configure(EventLogSetting::LogPath(IOLOG_DIR));

        let user_info = strings(args.user_info);
        let Some((name, uid, gid)) = fill_user(&mut ctx.user, &user_info) else {
            let msg = "unable to get user info";
            self.inform_error(msg);
            return OpenReply::with_error(0, msg);
        };
        ctx.user.pw = Some(ctx.identities.passwd(&name, uid, gid));
        ctx.user.gid_list = Some(ctx.identities.gid_list(&name, &ctx.user.gids));

        let settings = strings(args.settings);
        let runas_user = value(&settings, "runas_user=").unwrap_or("root");
        let runas_uid = if runas_user == "root" { 0 } else { uid };
        ctx.user.runas_pw = Some(ctx.identities.passwd(runas_user, runas_uid, runas_uid));
        if let Some(group) = value(&settings, "runas_group=") {
            ctx.user.runas_gr = Some(ctx.identities.group(group, runas_uid));
        }

        ctx.env.init(Some(args.environ));
        ctx.capabilities.perms.set_perms(Perm::Initial);
        trace!(user = %name, uid, "loopback open");
        OpenReply::new(1)
    }

    fn check_policy(&mut self, ctx: &mut PolicyContext, args: CheckArgs<'_>) -> CheckReply {
        self.stats.checks += 1;
        let argv: Vec<String> = strings(Some(args.argv))
            .into_iter()
            .map(|a| a.strip_prefix(ARGV_KEY).map(str::to_string).unwrap_or(a))
            .collect();
        let env_add: Vec<String> = strings(args.env_add)
            .into_iter()
            .map(|e| e.strip_prefix(ENV_KEY).map(str::to_string).unwrap_or(e))
            .collect();

        let command = argv.first().map(String::as_str).unwrap_or_default();
        let Some(resolved) = ctx.capabilities.resolver.find_path(command) else {
            let msg = format!("{command}: command not found");
            self.inform_error(&msg);
            return CheckReply::with_error(0, msg);
        };

        ctx.user.cmnd = Some(resolved.clone());
        ctx.user.cmnd_safe = Some(resolved.clone());
        ctx.user.cmnd_args = (argv.len() > 1).then(|| argv[1..].join(" "));

        if let Some(pw) = ctx.user.pw.clone() {
            for backend in ctx.capabilities.nss.read() {
                backend.open();
                backend.parse();
                backend.getdefs();
                backend.query(&pw);
            }
            let validated = ctx.capabilities.nss.lookup(&pw, 0);
            ctx.capabilities.session.check_user(validated, 0);
        }

        let id = ctx.capabilities.iolog.iolog_nextid(IOLOG_DIR);
        ctx.user.iolog_path = ctx
            .capabilities
            .iolog
            .expand_iolog_path(&format!("{IOLOG_DIR}/{id}"), PATH_MAX);
        ctx.user.iolog_file = Some(id);

        let name = ctx.user.name.as_deref().unwrap_or("unknown");
        self.inform(format!("{name} may run {resolved}"));

        let mut command_info = vec![format!("command={resolved}")];
        if let Some(runas) = &ctx.user.runas_pw {
            command_info.push(format!("runas_uid={}", runas.uid));
            command_info.push(format!("runas_gid={}", runas.gid));
        }
        if let Some(cwd) = &ctx.user.cwd {
            command_info.push(format!("cwd={cwd}"));
        }
        if let Some(path) = &ctx.user.iolog_path {
            command_info.push(format!("iolog_path={path}"));
        }
        if let Some(mode) = self.plugin_args.sudoers_mode {
            command_info.push(format!("sudoers_mode={mode:o}"));
        }

        let mut argv_out = argv;
        if let Some(first) = argv_out.first_mut() {
            *first = resolved;
        }
        let mut user_env_out = ctx.env.entries().to_vec();
        user_env_out.extend(env_add);

        CheckReply::new(
            1,
            CheckOutput {
                command_info,
                argv_out,
                user_env_out,
            },
        )
    }

    fn close(&mut self, ctx: &mut PolicyContext, exit_status: i32, signal: i32) {
        self.stats.closes += 1;
        for backend in ctx.capabilities.nss.read() {
            backend.close();
        }
        ctx.capabilities.group_plugin.unload();
        ctx.capabilities.perms.restore_perms();
        trace!(exit_status, signal, "loopback close");
    }
}
