use crate::context::PolicyContext;
use crate::relay::{Conversation, Printf};
use serde::Deserialize;
use std::ffi::CString;
use std::fmt;
use std::rc::Rc;

/// Plugin API version token passed to `open`.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
}

impl ApiVersion {
    pub const CURRENT: ApiVersion = ApiVersion {
        major: 1,
        minor: 17,
    };

    /// The packed form used on the C side: major in the high half.
    pub fn as_raw(self) -> u32 {
        (u32::from(self.major) << 16) | u32::from(self.minor)
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Everything `open` receives.
///
/// A `None` vector is the null pointer a C plugin would see; see
/// [`crate::strvec::StringArray::sentinel_view`] for the pointer form.
pub struct OpenArgs<'a> {
    pub api_version: ApiVersion,
    pub conversation: Rc<dyn Conversation>,
    pub printf: Rc<dyn Printf>,
    pub settings: Option<&'a [CString]>,
    pub user_info: Option<&'a [CString]>,
    pub environ: &'a [CString],
    pub plugin_args: Option<&'a [CString]>,
}

/// Everything `check_policy` receives. `argc` is `argv.len()`.
pub struct CheckArgs<'a> {
    pub argv: &'a [CString],
    pub env_add: Option<&'a [CString]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReply {
    pub code: i32,
    pub errstr: Option<String>,
}

impl OpenReply {
    pub fn new(code: i32) -> Self {
        Self { code, errstr: None }
    }

    pub fn with_error(code: i32, errstr: impl Into<String>) -> Self {
        Self {
            code,
            errstr: Some(errstr.into()),
        }
    }
}

/// Vectors produced by `check_policy`. Ownership passes to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckOutput {
    pub command_info: Vec<String>,
    pub argv_out: Vec<String>,
    pub user_env_out: Vec<String>,
}

impl CheckOutput {
    pub fn entry_count(&self) -> usize {
        self.command_info.len() + self.argv_out.len() + self.user_env_out.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReply {
    pub code: i32,
    pub output: CheckOutput,
    pub errstr: Option<String>,
}

impl CheckReply {
    pub fn new(code: i32, output: CheckOutput) -> Self {
        Self {
            code,
            output,
            errstr: None,
        }
    }

    pub fn with_error(code: i32, errstr: impl Into<String>) -> Self {
        Self {
            code,
            output: CheckOutput::default(),
            errstr: Some(errstr.into()),
        }
    }
}

/// How `open` went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// `0`: the plugin refused to open; close still runs.
    Failure,
    /// `1`: proceed to check.
    Success,
    /// Anything else: fatal or usage error; close is skipped.
    Fatal(i32),
}

impl OpenStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Failure,
            1 => Self::Success,
            other => Self::Fatal(other),
        }
    }
}

/// How `check_policy` went. The driver only records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Allowed,
    Denied,
    Error,
    Usage,
    Unknown(i32),
}

impl CheckStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Allowed,
            0 => Self::Denied,
            -1 => Self::Error,
            -2 => Self::Usage,
            other => Self::Unknown(other),
        }
    }
}

/// An authorization-policy plugin driven through open, check and close.
pub trait PolicyPlugin {
    fn name(&self) -> &'static str;

    fn open(&mut self, ctx: &mut PolicyContext, args: OpenArgs<'_>) -> OpenReply;

    fn check_policy(&mut self, ctx: &mut PolicyContext, args: CheckArgs<'_>) -> CheckReply;

    /// Whether the plugin provides a close entry point at all.
    fn has_close(&self) -> bool {
        true
    }

    fn close(&mut self, ctx: &mut PolicyContext, exit_status: i32, signal: i32);
}
