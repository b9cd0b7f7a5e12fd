//! Runs many workflow instances side by side.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::WorkflowError;
use crate::workflow::{RunReport, WorkflowEngine};

/// One job to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub game_id: String,
    pub job_id: String,
    /// Review export to import before running, if not already staged.
    #[serde(default)]
    pub source: Option<PathBuf>,
}

/// A list of jobs read from a TOML manifest:
///
/// ```toml
/// [[jobs]]
/// game_id = "elden-ring"
/// job_id = "2024-05-reviews"
/// source = "exports/elden_ring.csv"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub jobs: Vec<JobSpec>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest = toml::from_str::<Manifest>(&contents)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        Ok(manifest)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("job {0} appears more than once in the batch")]
    DuplicateJob(String),
}

/// Why one job in a batch did not produce a report.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("workflow task failed: {0}")]
    Task(String),
}

/// Outcome of one job in a batch.
#[derive(Debug)]
pub struct JobResult {
    pub spec: JobSpec,
    pub result: Result<RunReport, JobError>,
}

pub struct Runner {
    engine: Arc<WorkflowEngine>,
}

impl Runner {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    /// Run every job concurrently and return the results in input order.
    ///
    /// A job id may appear only once per batch, since two live workflows for
    /// the same job would write to the same result keys. A job whose task
    /// panics gets a [`JobError::Task`] entry; the other jobs keep running.
    pub async fn run_all(&self, jobs: Vec<JobSpec>) -> Result<Vec<JobResult>, RunnerError> {
        let mut seen = HashSet::new();
        for spec in &jobs {
            if !seen.insert(spec.job_id.as_str()) {
                return Err(RunnerError::DuplicateJob(spec.job_id.clone()));
            }
        }

        info!(jobs = jobs.len(), "starting workflow batch");
        let specs = jobs.clone();
        let mut tasks = JoinSet::new();
        for (index, spec) in jobs.into_iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move {
                let (game_id, job_id) = (spec.game_id.clone(), spec.job_id.clone());
                // Own task per workflow so a panic stays with its job.
                let workflow = tokio::spawn(async move { engine.run(&game_id, &job_id).await });
                let result = match workflow.await {
                    Ok(result) => result.map_err(JobError::from),
                    Err(err) => {
                        error!(job_id = %spec.job_id, error = %err, "workflow task failed");
                        Err(JobError::Task(err.to_string()))
                    }
                };
                (index, JobResult { spec, result })
            });
        }

        let mut slots: Vec<Option<JobResult>> = specs.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => error!(error = %err, "runner task failed"),
            }
        }

        Ok(specs
            .into_iter()
            .zip(slots)
            .map(|(spec, slot)| {
                slot.unwrap_or_else(|| JobResult {
                    spec,
                    result: Err(JobError::Task("task did not finish".into())),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{
        DispatchScript, MemoryPersister, RecordingNotifier, ScriptedDispatcher, ScriptedProber,
        SimulatedPreparer,
    };
    use crate::error::StepError;
    use crate::ports::{DispatchRequest, JobDispatcher, ProbeResult, StatusProber};
    use crate::workflow::{Collaborators, JobHandle, JobOutcome};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Hands out `job/<job name>` so handles do not depend on dispatch order.
    struct NamedDispatcher;

    #[async_trait]
    impl JobDispatcher for NamedDispatcher {
        async fn dispatch(&self, request: &DispatchRequest) -> Result<JobHandle, StepError> {
            Ok(JobHandle::new(format!("job/{}", request.job_name)))
        }
    }

    /// Panics when asked about one particular job, answers Completed otherwise.
    struct PanickingProber {
        broken: &'static str,
    }

    #[async_trait]
    impl StatusProber for PanickingProber {
        async fn probe(&self, handle: &JobHandle) -> Result<ProbeResult, StepError> {
            if handle.as_str() == self.broken {
                panic!("status lookup bug for {handle}");
            }
            Ok(ProbeResult {
                status: "Completed".into(),
                job_handle: handle.clone(),
                message: None,
            })
        }
    }

    fn spec(game_id: &str, job_id: &str) -> JobSpec {
        JobSpec {
            game_id: game_id.into(),
            job_id: job_id.into(),
            source: None,
        }
    }

    fn engine(persister: Arc<MemoryPersister>) -> Arc<WorkflowEngine> {
        Arc::new(WorkflowEngine::new(Collaborators {
            preparer: Arc::new(SimulatedPreparer::new()),
            dispatcher: Arc::new(ScriptedDispatcher::new([
                DispatchScript::handle("job/a"),
                DispatchScript::handle("job/b"),
            ])),
            prober: Arc::new(ScriptedProber::new(&["InProgress", "InProgress", "Completed"])),
            persister,
            notifier: Arc::new(RecordingNotifier::new()),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_wait_concurrently() {
        let persister = Arc::new(MemoryPersister::with_records(["r1"]));
        let runner = Runner::new(engine(persister.clone()));
        let start = Instant::now();

        let results = runner
            .run_all(vec![spec("g1", "j1"), spec("g1", "j2")])
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].spec.job_id, "j1");
        assert_eq!(results[1].spec.job_id, "j2");
        for result in &results {
            let report = result.result.as_ref().unwrap();
            assert_eq!(report.outcome, JobOutcome::Succeeded);
        }
        assert_eq!(persister.stored_count("g1", "j1"), 1);
        assert_eq!(persister.stored_count("g1", "j2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_does_not_take_siblings_down() {
        let persister = Arc::new(MemoryPersister::with_records(["r1"]));
        let engine = Arc::new(WorkflowEngine::new(Collaborators {
            preparer: Arc::new(SimulatedPreparer::new()),
            dispatcher: Arc::new(NamedDispatcher),
            prober: Arc::new(PanickingProber { broken: "job/j1" }),
            persister: persister.clone(),
            notifier: Arc::new(RecordingNotifier::new()),
        }));

        let results = Runner::new(engine)
            .run_all(vec![spec("g1", "j1"), spec("g1", "j2")])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].spec.job_id, "j1");
        assert!(matches!(results[0].result, Err(JobError::Task(_))));
        assert_eq!(results[1].spec.job_id, "j2");
        let report = results[1].result.as_ref().unwrap();
        assert_eq!(report.outcome, JobOutcome::Succeeded);
        assert_eq!(persister.stored_count("g1", "j2"), 1);
    }

    #[tokio::test]
    async fn duplicate_job_ids_are_rejected() {
        let runner = Runner::new(engine(Arc::new(MemoryPersister::with_records(["r1"]))));
        let err = runner
            .run_all(vec![spec("g1", "j1"), spec("g2", "j1")])
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::DuplicateJob(id) if id == "j1"));
    }

    #[test]
    fn manifest_parses_jobs() {
        let manifest: Manifest = toml::from_str(
            r#"
            [[jobs]]
            game_id = "g1"
            job_id = "j1"
            source = "exports/g1.csv"

            [[jobs]]
            game_id = "g2"
            job_id = "j2"
            "#,
        )
        .unwrap();
        assert_eq!(manifest.jobs.len(), 2);
        assert_eq!(manifest.jobs[0].source, Some(PathBuf::from("exports/g1.csv")));
        assert!(manifest.jobs[1].source.is_none());
    }
}
