pub mod capabilities;
pub mod classifier;
pub mod config;
pub mod context;
pub mod corpus;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod executor;
pub mod harness;
pub mod input;
pub mod logging;
pub mod loopback;
pub mod mutator;
pub mod oracle;
pub mod plugin;
pub mod relay;
pub mod strvec;
#[cfg(test)]
mod testing;

pub use capabilities::{Capabilities, Noop};
pub use classifier::{Category, CategoryCounts, Collections, classify};
pub use config::HarnessConfig;
pub use context::{PolicyContext, ResetReport, UserState};
pub use corpus::{Corpus, CorpusError, SeedCorpus};
pub use decoder::{InputBacking, InputDecoder};
pub use driver::{DriverSettings, LifecycleDriver, LifecycleOutcome, LifecycleState};
pub use error::HarnessError;
pub use executor::{ExecutionStatus, Executor, InProcessExecutor};
pub use harness::{Disposition, Harness, IterationReport};
pub use input::Input;
pub use loopback::LoopbackPolicy;
pub use mutator::{LineMutation, LineMutator, Mutator};
pub use oracle::{BugReport, CrashOracle, Oracle};
pub use plugin::{CheckStatus, OpenStatus, PolicyPlugin};
pub use relay::{Conversation, Printf, StdioRelay};
pub use strvec::StringArray;
