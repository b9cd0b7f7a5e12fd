//! Interfaces to the external collaborators the workflow drives.
//!
//! Each trait covers one capability: run the step and return its result or a
//! [`StepError`]. Implementations must be safe to share across concurrently
//! running workflow instances.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StepError;
use crate::workflow::{JobContext, JobHandle, StagedLocations};

/// Stages the raw review records of a job for batch inference.
#[async_trait]
pub trait InputPreparer: Send + Sync {
    async fn prepare(&self, game_id: &str, job_id: &str) -> Result<StagedLocations, StepError>;
}

/// Payload handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub job_name: String,
    pub input_location: String,
    pub output_location: String,
}

/// Submits a prepared job to the batch inference service.
///
/// Capacity problems on the provider side must surface as
/// [`StepError::QuotaExceeded`]; that is the only kind the workflow retries.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<JobHandle, StepError>;
}

/// Current status of a job as reported by the batch service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    /// Raw status string, routed as-is.
    pub status: String,
    pub job_handle: JobHandle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[async_trait]
pub trait StatusProber: Send + Sync {
    async fn probe(&self, handle: &JobHandle) -> Result<ProbeResult, StepError>;
}

/// Durably stores the records a completed job produced.
///
/// Must be idempotent: persisting the same context twice leaves the same
/// stored record set as persisting it once.
#[async_trait]
pub trait ResultPersister: Send + Sync {
    /// Returns the number of records stored.
    async fn persist(&self, context: &JobContext) -> Result<usize, StepError>;
}

/// Destination of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Success,
    Failure,
}

/// Short form sent for completed and stopped jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub game_id: String,
    pub job_handle: JobHandle,
}

/// A message emitted when a workflow reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum Notification {
    Succeeded(JobSummary),
    Stopped(JobSummary),
    /// Carries the whole context so operators can see what went wrong.
    Failed(Box<JobContext>),
}

impl Notification {
    /// Stopped jobs go to the failure channel along with failures; operators
    /// watch that channel for anything that did not produce results.
    pub fn channel(&self) -> Channel {
        match self {
            Notification::Succeeded(_) => Channel::Success,
            Notification::Stopped(_) | Notification::Failed(_) => Channel::Failure,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Succeeded(_) => "succeeded",
            Notification::Stopped(_) => "stopped",
            Notification::Failed(_) => "failed",
        }
    }

    pub fn game_id(&self) -> &str {
        match self {
            Notification::Succeeded(summary) | Notification::Stopped(summary) => &summary.game_id,
            Notification::Failed(context) => context.game_id(),
        }
    }
}

/// Delivers notifications to a channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> JobSummary {
        JobSummary {
            game_id: "g1".into(),
            job_handle: JobHandle::new("job/abc"),
        }
    }

    #[test]
    fn notification_channels() {
        assert_eq!(Notification::Succeeded(summary()).channel(), Channel::Success);
        assert_eq!(Notification::Stopped(summary()).channel(), Channel::Failure);
        let failed = Notification::Failed(Box::new(JobContext::new("g1", "j1")));
        assert_eq!(failed.channel(), Channel::Failure);
        assert_eq!(failed.game_id(), "g1");
    }

    #[test]
    fn summary_serializes_game_id_and_handle() {
        let json = serde_json::to_value(Notification::Stopped(summary())).unwrap();
        assert_eq!(json["kind"], "stopped");
        assert_eq!(json["detail"]["gameId"], "g1");
        assert_eq!(json["detail"]["jobHandle"], "job/abc");
    }

    #[test]
    fn probe_result_message_is_optional() {
        let probe: ProbeResult =
            serde_json::from_str(r#"{"status":"InProgress","jobHandle":"job/1"}"#).unwrap();
        assert_eq!(probe.status, "InProgress");
        assert!(probe.message.is_none());
    }
}
