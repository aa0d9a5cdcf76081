use crate::input::Input;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    /// The harness panicked; carries the panic message.
    Crash(String),
}

pub trait Executor<I: Input> {
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus;

    /// Total time spent inside the harness so far.
    fn elapsed(&self) -> Duration;
}

/// Calls a harness closure in the current process, turning panics into crashes.
pub struct InProcessExecutor<F>
where
    F: FnMut(&[u8]),
{
    harness_fn: F,
    elapsed: Duration,
}

impl<F> InProcessExecutor<F>
where
    F: FnMut(&[u8]),
{
    pub fn new(harness_fn: F) -> Self {
        Self {
            harness_fn,
            elapsed: Duration::ZERO,
        }
    }
}

impl<I: Input, F> Executor<I> for InProcessExecutor<F>
where
    F: FnMut(&[u8]),
{
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus {
        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            (self.harness_fn)(input.as_bytes());
        }));
        self.elapsed += start.elapsed();

        match result {
            Ok(()) => ExecutionStatus::Ok,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                warn!(panic = %msg, "harness panicked");
                ExecutionStatus::Crash(msg)
            }
        }
    }

    fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
