mod record;
mod state;

pub use record::{
    DocumentRef, FailureKind, FileKind, Item, RetryConfig, RunReport, RunResult, StageOutcome,
    WorkflowRun,
};
pub use state::{RunMachine, RunState, Transition};
