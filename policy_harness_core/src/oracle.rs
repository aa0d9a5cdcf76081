use crate::executor::ExecutionStatus;
use crate::input::Input;

/// Severity assigned to a harness panic.
const DEFAULT_CRASH_SEVERITY: u8 = 10;

/// A finding worth saving, tied to the input that produced it.
#[derive(Debug)]
pub struct BugReport<I: Input> {
    pub input: I,
    pub description: String,
    /// MD5 of the input as lowercase hex; also used as the artifact file name.
    pub input_hash: String,
    pub severity: u8,
}

/// Decides whether an execution outcome is a bug.
pub trait Oracle<I: Input> {
    fn examine(&self, input: &I, status: &ExecutionStatus) -> Option<BugReport<I>>;
}

/// Reports every crash.
#[derive(Debug, Default)]
pub struct CrashOracle;

impl CrashOracle {
    pub fn new() -> Self {
        CrashOracle
    }
}

impl<I: Input> Oracle<I> for CrashOracle {
    fn examine(&self, input: &I, status: &ExecutionStatus) -> Option<BugReport<I>> {
        match status {
            ExecutionStatus::Crash(description) => Some(BugReport {
                input: input.clone(),
                description: description.clone(),
                input_hash: format!("{:x}", md5::compute(input.as_bytes())),
                severity: DEFAULT_CRASH_SEVERITY,
            }),
            ExecutionStatus::Ok => None,
        }
    }
}
