use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::{JobContext, JobOutcome};
use super::state::State;

/// Structured record produced when a workflow instance reaches a terminal
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: JobOutcome,
    pub context: JobContext,
    pub state_transitions: Vec<State>,
    pub dispatch_attempts: u32,
    /// Waits taken between dispatch attempts, in order.
    pub backoff_waits: Vec<Duration>,
    pub polls: u32,
    pub poll_waited: Duration,
    /// Records stored by the persister; only set when the job completed.
    pub records_stored: Option<usize>,
    /// Delivery failure of the terminal notification, if any.
    pub notification_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunReport {
    /// Total time the workflow spent waiting, backoff plus polling.
    pub fn total_waited(&self) -> Duration {
        self.backoff_waits
            .iter()
            .fold(self.poll_waited, |total, wait| total.saturating_add(*wait))
    }
}
