use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::error::WorkflowError;
use crate::ports::{ProbeResult, StatusProber};
use crate::workflow::JobHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Wait-then-probe loop used while the batch job runs.
///
/// There is no cap on the number of polls. `max_wait`, when set, bounds the
/// time spent polling; it is off unless the caller asks for it.
#[derive(Debug)]
pub struct PollScheduler {
    interval: Duration,
    max_wait: Option<Duration>,
    started: Instant,
    waited: Duration,
    polls: u32,
}

impl PollScheduler {
    pub fn new(interval: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            interval,
            max_wait,
            started: Instant::now(),
            waited: Duration::ZERO,
            polls: 0,
        }
    }

    /// Sleep for one interval, then ask the prober for the job's status.
    ///
    /// Fails with [`WorkflowError::TimedOut`] instead of sleeping when the
    /// next wait would overrun `max_wait`.
    pub async fn wait_then_probe(
        &mut self,
        prober: &dyn StatusProber,
        handle: &JobHandle,
    ) -> Result<ProbeResult, WorkflowError> {
        if let Some(max_wait) = self.max_wait
            && self.started.elapsed() + self.interval > max_wait
        {
            return Err(WorkflowError::TimedOut {
                waited: self.started.elapsed(),
            });
        }

        sleep(self.interval).await;
        self.waited += self.interval;
        self.polls += 1;
        debug!(poll = self.polls, job_handle = %handle, "probing job status");

        prober.probe(handle).await.map_err(WorkflowError::Probe)
    }

    /// Number of probes issued so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Total time spent in inter-poll waits.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}
