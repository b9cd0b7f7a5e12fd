mod context;
mod engine;
mod poll;
mod report;
mod retry;
mod router;
mod state;

pub use context::{check_path_id, JobContext, JobHandle, JobOutcome, JobStatus, StagedLocations};
pub use engine::{Collaborators, NoopObserver, WorkflowEngine, WorkflowObserver};
pub use poll::{DEFAULT_POLL_INTERVAL, PollScheduler};
pub use report::RunReport;
pub use retry::{RetryDecision, RetryPolicy};
pub use router::{OutcomeRouter, Route, TerminalStatus};
pub use state::{Event, State, StateMachine, Transition};
