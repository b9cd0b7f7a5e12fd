use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorInfo, StepError, WorkflowError};

/// Lifecycle status of the externally running job, as last reported by the
/// batch service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
    Stopped,
    Unknown,
}

impl JobStatus {
    /// Map a raw status string from the batch service.
    ///
    /// The service reports more intermediate states than we model
    /// (`Validating`, `Scheduled`, `Stopping`, ...); those and anything
    /// unrecognised become `Unknown`.
    pub fn from_reported(raw: &str) -> Self {
        match raw {
            "Submitted" => JobStatus::Submitted,
            "InProgress" => JobStatus::InProgress,
            "Completed" => JobStatus::Completed,
            "Failed" => JobStatus::Failed,
            "Stopped" => JobStatus::Stopped,
            _ => JobStatus::Unknown,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Submitted => write!(f, "Submitted"),
            JobStatus::InProgress => write!(f, "InProgress"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Opaque identifier of a job running on the batch service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the handle. Handles are usually ARNs such as
    /// `arn:aws:bedrock:...:model-invocation-job/abc123`, and the service
    /// writes output under a directory named after that segment.
    pub fn short_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input and output locations produced by the preparer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedLocations {
    pub input: String,
    pub output: String,
}

/// Check that a game or job id can be used as a single path segment.
///
/// Rejects empty ids, `.` and `..`, and anything containing a path separator
/// or NUL, so ids never escape the directory they are joined onto.
pub fn check_path_id(id: &str) -> Result<&str, String> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(format!("invalid id {id:?}"));
    }
    if id.contains(['/', '\\', '\0']) {
        return Err(format!("id {id:?} must not contain path separators"));
    }
    Ok(id)
}

/// How a workflow instance ended.
///
/// `Succeeded` and `Stopped` are both successful completions of the workflow;
/// use [`is_success`](Self::is_success) for the pass/fail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Results were persisted.
    Succeeded,
    /// An operator stopped the job. The workflow still succeeds; the variant
    /// only records that it succeeded through a stop, so monitoring can tell
    /// the two apart.
    Stopped,
    /// The batch service reported the job as failed.
    Failed,
}

impl JobOutcome {
    /// True for every outcome that ends the workflow successfully,
    /// including an operator stop.
    pub fn is_success(&self) -> bool {
        !matches!(self, JobOutcome::Failed)
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "Succeeded"),
            JobOutcome::Stopped => write!(f, "Stopped"),
            JobOutcome::Failed => write!(f, "Failed"),
        }
    }
}

/// Record threaded through every step of one workflow instance.
///
/// Locations and the job handle are write-once. `status` stays `None` until
/// dispatch hands back a job handle, so `job_handle.is_some() ==
/// status.is_some()` holds at every point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    game_id: String,
    job_id: String,
    input_location: Option<String>,
    output_location: Option<String>,
    job_handle: Option<JobHandle>,
    status: Option<JobStatus>,
    status_message: Option<String>,
    attempt: u32,
    last_error: Option<ErrorInfo>,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    last_polled_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobContext {
    pub fn new(game_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            job_id: job_id.into(),
            input_location: None,
            output_location: None,
            job_handle: None,
            status: None,
            status_message: None,
            attempt: 0,
            last_error: None,
            created_at: Utc::now(),
            submitted_at: None,
            last_polled_at: None,
            finished_at: None,
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn input_location(&self) -> Option<&str> {
        self.input_location.as_deref()
    }

    pub fn output_location(&self) -> Option<&str> {
        self.output_location.as_deref()
    }

    pub fn job_handle(&self) -> Option<&JobHandle> {
        self.job_handle.as_ref()
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.status
    }

    /// Free-form message the batch service attached to the last status.
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Number of dispatch attempts made so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn last_polled_at(&self) -> Option<DateTime<Utc>> {
        self.last_polled_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub(crate) fn record_locations(
        &mut self,
        locations: StagedLocations,
    ) -> Result<(), WorkflowError> {
        if self.input_location.is_some() || self.output_location.is_some() {
            return Err(WorkflowError::ContextViolation("locations already set"));
        }
        self.input_location = Some(locations.input);
        self.output_location = Some(locations.output);
        Ok(())
    }

    /// Count a new dispatch attempt and return its 1-based number.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub(crate) fn record_failure(&mut self, err: &StepError) {
        self.last_error = Some(ErrorInfo::from(err));
    }

    pub(crate) fn record_dispatch(&mut self, handle: JobHandle) -> Result<(), WorkflowError> {
        if self.job_handle.is_some() {
            return Err(WorkflowError::ContextViolation("job handle already set"));
        }
        if self.input_location.is_none() {
            return Err(WorkflowError::ContextViolation(
                "dispatch recorded before preparation",
            ));
        }
        self.job_handle = Some(handle);
        self.status = Some(JobStatus::Submitted);
        self.submitted_at = Some(Utc::now());
        self.last_error = None;
        Ok(())
    }

    pub(crate) fn record_probe(
        &mut self,
        raw_status: &str,
        message: Option<String>,
    ) -> Result<JobStatus, WorkflowError> {
        if self.job_handle.is_none() {
            return Err(WorkflowError::ContextViolation(
                "probe recorded before dispatch",
            ));
        }
        let status = JobStatus::from_reported(raw_status);
        self.status = Some(status);
        self.status_message = message.filter(|m| !m.is_empty());
        self.last_polled_at = Some(Utc::now());
        Ok(status)
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
