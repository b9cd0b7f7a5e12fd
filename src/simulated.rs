//! Scripted in-memory collaborators.
//!
//! Used by the `demo` command and by tests to drive the workflow without a
//! batch service. Every collaborator counts its calls so callers can check
//! which steps ran.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StepError;
use crate::ports::{
    DispatchRequest, InputPreparer, JobDispatcher, Notification, Notifier, ProbeResult,
    ResultPersister, StatusProber,
};
use crate::workflow::{JobContext, JobHandle, StagedLocations};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Preparer that stages nothing and hands back in-memory locations.
#[derive(Default)]
pub struct SimulatedPreparer {
    failure: Mutex<Option<String>>,
    calls: AtomicU32,
}

impl SimulatedPreparer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call fail with a preparation error.
    pub fn fail_with(&self, message: impl Into<String>) {
        *lock(&self.failure) = Some(message.into());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputPreparer for SimulatedPreparer {
    async fn prepare(&self, game_id: &str, job_id: &str) -> Result<StagedLocations, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.failure).clone() {
            return Err(StepError::Preparation(message));
        }
        Ok(StagedLocations {
            input: format!("mem://{game_id}/jobs/{job_id}/input.jsonl"),
            output: format!("mem://{game_id}/jobs/{job_id}/output/"),
        })
    }
}

/// One scripted response of [`ScriptedDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchScript {
    Handle(String),
    QuotaExceeded,
    Fail(String),
}

impl DispatchScript {
    pub fn handle(handle: impl Into<String>) -> Self {
        DispatchScript::Handle(handle.into())
    }
}

/// Dispatcher that replays a fixed list of responses.
pub struct ScriptedDispatcher {
    script: Mutex<VecDeque<DispatchScript>>,
    calls: AtomicU32,
}

impl ScriptedDispatcher {
    pub fn new(script: impl IntoIterator<Item = DispatchScript>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, _request: &DispatchRequest) -> Result<JobHandle, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.script).pop_front() {
            Some(DispatchScript::Handle(handle)) => Ok(JobHandle::new(handle)),
            Some(DispatchScript::QuotaExceeded) => Err(StepError::QuotaExceeded(
                "ServiceQuotaExceededException: too many concurrent jobs".into(),
            )),
            Some(DispatchScript::Fail(message)) => Err(StepError::Dispatch(message)),
            None => Err(StepError::Dispatch("dispatch script exhausted".into())),
        }
    }
}

/// Prober that replays a list of statuses.
///
/// Once the list runs out it keeps answering with the last status, or
/// `InProgress` when the list was empty.
pub struct ScriptedProber {
    statuses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    calls: AtomicU32,
}

impl ScriptedProber {
    pub fn new(statuses: &[&str]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new("InProgress".to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusProber for ScriptedProber {
    async fn probe(&self, handle: &JobHandle) -> Result<ProbeResult, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = {
            let mut last = lock(&self.last);
            if let Some(next) = lock(&self.statuses).pop_front() {
                *last = next;
            }
            last.clone()
        };
        Ok(ProbeResult {
            status,
            job_handle: handle.clone(),
            message: None,
        })
    }
}

/// Persister that keeps stored record keys in memory.
///
/// Each completed job is assumed to produce the same fixed set of record ids.
pub struct MemoryPersister {
    produced: Vec<String>,
    stored: Mutex<BTreeMap<(String, String), BTreeSet<String>>>,
    failure: Mutex<Option<String>>,
    calls: AtomicU32,
}

impl MemoryPersister {
    pub fn with_records<I, S>(record_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            produced: record_ids.into_iter().map(Into::into).collect(),
            stored: Mutex::new(BTreeMap::new()),
            failure: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        *lock(&self.failure) = Some(message.into());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stored record keys for a job.
    pub fn stored(&self, game_id: &str, job_id: &str) -> BTreeSet<String> {
        lock(&self.stored)
            .get(&(game_id.to_string(), job_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn stored_count(&self, game_id: &str, job_id: &str) -> usize {
        self.stored(game_id, job_id).len()
    }
}

#[async_trait]
impl ResultPersister for MemoryPersister {
    async fn persist(&self, context: &JobContext) -> Result<usize, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.failure).clone() {
            return Err(StepError::Persist(message));
        }
        let key = (context.game_id().to_string(), context.job_id().to_string());
        let mut stored = lock(&self.stored);
        let records = stored.entry(key).or_default();
        for record_id in &self.produced {
            records.insert(format!("REVIEW#{}#{record_id}", context.job_id()));
        }
        Ok(self.produced.len())
    }
}

/// Notifier that records what it was asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
    attempts: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every later delivery.
    pub fn fail_deliveries(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    /// Deliveries attempted, including refused ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), StepError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(StepError::Notify("channel refused delivery".into()));
        }
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prober_repeats_last_status() {
        let prober = ScriptedProber::new(&["Submitted", "InProgress"]);
        let handle = JobHandle::new("job/1");
        assert_eq!(prober.probe(&handle).await.unwrap().status, "Submitted");
        assert_eq!(prober.probe(&handle).await.unwrap().status, "InProgress");
        assert_eq!(prober.probe(&handle).await.unwrap().status, "InProgress");
        assert_eq!(prober.calls(), 3);
    }

    #[tokio::test]
    async fn dispatcher_replays_script() {
        let dispatcher = ScriptedDispatcher::new([
            DispatchScript::QuotaExceeded,
            DispatchScript::handle("job/9"),
        ]);
        let request = DispatchRequest {
            job_name: "j1".into(),
            input_location: "in".into(),
            output_location: "out".into(),
        };
        let err = dispatcher.dispatch(&request).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(dispatcher.dispatch(&request).await.unwrap().as_str(), "job/9");
        assert!(dispatcher.dispatch(&request).await.is_err());
    }

    #[tokio::test]
    async fn memory_persister_is_idempotent() {
        let persister = MemoryPersister::with_records(["r1", "r2", "r3"]);
        let ctx = JobContext::new("g1", "j1");

        assert_eq!(persister.persist(&ctx).await.unwrap(), 3);
        let once = persister.stored("g1", "j1");
        persister.persist(&ctx).await.unwrap();
        assert_eq!(persister.stored("g1", "j1"), once);
        assert!(once.contains("REVIEW#j1#r2"));
    }

    #[tokio::test]
    async fn refused_delivery_is_not_recorded() {
        let notifier = RecordingNotifier::new();
        notifier.fail_deliveries();
        let result = notifier
            .notify(&Notification::Failed(Box::new(JobContext::new("g1", "j1"))))
            .await;
        assert!(matches!(result, Err(StepError::Notify(_))));
        assert!(notifier.sent().is_empty());
        assert_eq!(notifier.attempts(), 1);
    }
}
