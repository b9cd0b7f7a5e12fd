use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};

use super::context::{JobContext, JobHandle, JobOutcome};
use super::poll::{DEFAULT_POLL_INTERVAL, PollScheduler};
use super::report::RunReport;
use super::retry::RetryPolicy;
use super::router::{OutcomeRouter, Route, TerminalStatus};
use super::state::{Event, State, StateMachine, Transition};
use crate::error::{StepError, WorkflowError};
use crate::ports::{
    DispatchRequest, InputPreparer, JobDispatcher, JobSummary, Notification, Notifier,
    ResultPersister, StatusProber,
};

/// The external collaborators a workflow calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub preparer: Arc<dyn InputPreparer>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub prober: Arc<dyn StatusProber>,
    pub persister: Arc<dyn ResultPersister>,
    pub notifier: Arc<dyn Notifier>,
}

/// Hooks for following a workflow as it runs. All methods default to no-ops.
pub trait WorkflowObserver: Send + Sync {
    fn on_transition(&self, _from: State, _to: State) {}

    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _wait: Duration, _error: &StepError) {}

    fn on_poll(&self, _poll: u32, _status: &str) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

/// Drives batch inference jobs from preparation to a terminal outcome.
///
/// One engine can run many jobs at once; each call to [`run`](Self::run)
/// owns its own [`JobContext`] and state machine.
pub struct WorkflowEngine {
    collaborators: Collaborators,
    retry_policy: RetryPolicy,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl WorkflowEngine {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            retry_policy: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Bound the time spent polling. `None` (the default) polls until the
    /// batch service reports a terminal status.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run the workflow for one `(game_id, job_id)` pair.
    ///
    /// The caller must not run two workflows for the same job id at once.
    pub async fn run(&self, game_id: &str, job_id: &str) -> Result<RunReport, WorkflowError> {
        self.run_observed(game_id, job_id, &NoopObserver).await
    }

    pub async fn run_observed(
        &self,
        game_id: &str,
        job_id: &str,
        observer: &dyn WorkflowObserver,
    ) -> Result<RunReport, WorkflowError> {
        let span = info_span!(
            "workflow",
            game_id = %game_id,
            job_id = %job_id,
            job_handle = field::Empty
        );
        Execution::new(self, observer, JobContext::new(game_id, job_id))
            .drive()
            .instrument(span)
            .await
    }
}

/// State of a single in-flight workflow instance.
struct Execution<'a> {
    engine: &'a WorkflowEngine,
    observer: &'a dyn WorkflowObserver,
    context: JobContext,
    machine: StateMachine,
    backoff_waits: Vec<Duration>,
    started_at: DateTime<Utc>,
}

impl<'a> Execution<'a> {
    fn new(
        engine: &'a WorkflowEngine,
        observer: &'a dyn WorkflowObserver,
        context: JobContext,
    ) -> Self {
        Self {
            engine,
            observer,
            context,
            machine: StateMachine::new(),
            backoff_waits: Vec::new(),
            started_at: Utc::now(),
        }
    }

    async fn drive(mut self) -> Result<RunReport, WorkflowError> {
        match self.execute().await {
            Ok(report) => Ok(report),
            Err(err) => {
                if !self.machine.state().is_terminal() {
                    let from = self.machine.state();
                    if self.machine.apply(Event::Fatal).is_ok() {
                        self.observer.on_transition(from, State::Aborted);
                    }
                }
                error!(
                    error = %err,
                    attempts = self.context.attempt(),
                    "workflow aborted"
                );
                Err(err)
            }
        }
    }

    async fn execute(&mut self) -> Result<RunReport, WorkflowError> {
        let engine = self.engine;
        let collaborators = &engine.collaborators;

        // PREPARING
        let locations = match collaborators
            .preparer
            .prepare(self.context.game_id(), self.context.job_id())
            .await
        {
            Ok(locations) => locations,
            Err(err) => {
                self.context.record_failure(&err);
                return Err(WorkflowError::Preparation(err));
            }
        };
        info!(
            input = %locations.input,
            output = %locations.output,
            "input staged"
        );
        self.context.record_locations(locations)?;
        self.advance(Event::Prepared)?;

        // DISPATCHING
        let handle = self.dispatch().await?;
        Span::current().record("job_handle", field::display(&handle));
        self.context.record_dispatch(handle.clone())?;
        self.advance(Event::Dispatched)?;

        // POLLING
        let mut scheduler = PollScheduler::new(engine.poll_interval, engine.max_wait);
        let terminal = loop {
            let probe = match scheduler
                .wait_then_probe(collaborators.prober.as_ref(), &handle)
                .await
            {
                Ok(probe) => probe,
                Err(err) => {
                    if let Some(step_err) = err.step_error() {
                        self.context.record_failure(step_err);
                    }
                    return Err(err);
                }
            };
            self.context.record_probe(&probe.status, probe.message)?;
            self.observer.on_poll(scheduler.polls(), &probe.status);
            info!(poll = scheduler.polls(), status = %probe.status, "job status observed");

            let route = OutcomeRouter::route(&probe.status);
            self.advance(Event::Observed(route))?;
            if let Route::Terminal(terminal) = route {
                break terminal;
            }
        };

        // BRANCH
        let summary = JobSummary {
            game_id: self.context.game_id().to_string(),
            job_handle: handle,
        };
        let (records_stored, notification) = match terminal {
            TerminalStatus::Completed => {
                let stored = match collaborators.persister.persist(&self.context).await {
                    Ok(stored) => stored,
                    Err(err) => {
                        self.context.record_failure(&err);
                        return Err(WorkflowError::Persist(err));
                    }
                };
                info!(records = stored, "results persisted");
                self.advance(Event::Persisted)?;
                (Some(stored), Notification::Succeeded(summary))
            }
            TerminalStatus::Failed => (
                None,
                Notification::Failed(Box::new(self.context.clone())),
            ),
            TerminalStatus::Stopped => (None, Notification::Stopped(summary)),
        };

        let notification_error = self.notify(&notification).await;
        let outcome = match self.advance(Event::Notified)? {
            Transition::Complete(outcome) => outcome,
            other => {
                return Err(WorkflowError::InvalidTransition {
                    from: self.machine.state(),
                    event: format!("{other:?}"),
                });
            }
        };
        self.context.finish();
        info!(%outcome, "workflow finished");

        Ok(self.report(outcome, records_stored, notification_error, &scheduler))
    }

    /// Submit the job, retrying quota errors as the retry policy allows.
    async fn dispatch(&mut self) -> Result<JobHandle, WorkflowError> {
        let engine = self.engine;
        let policy = &engine.retry_policy;
        let request = DispatchRequest {
            job_name: self.context.job_id().to_string(),
            input_location: self
                .context
                .input_location()
                .ok_or(WorkflowError::ContextViolation("missing input location"))?
                .to_string(),
            output_location: self
                .context
                .output_location()
                .ok_or(WorkflowError::ContextViolation("missing output location"))?
                .to_string(),
        };

        loop {
            let attempt = self.context.begin_attempt();
            match engine.collaborators.dispatcher.dispatch(&request).await {
                Ok(handle) => {
                    info!(attempt, job_handle = %handle, "job dispatched");
                    return Ok(handle);
                }
                Err(err) => {
                    self.context.record_failure(&err);
                    let decision = policy.decide(attempt, &err);
                    if !decision.should_retry {
                        return Err(WorkflowError::Dispatch {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        wait_secs = decision.wait_before_retry.as_secs(),
                        error = %err,
                        "dispatch throttled, retrying"
                    );
                    self.observer.on_retry(
                        attempt,
                        policy.max_attempts,
                        decision.wait_before_retry,
                        &err,
                    );
                    self.advance(Event::DispatchRetry)?;
                    sleep(decision.wait_before_retry).await;
                    self.backoff_waits.push(decision.wait_before_retry);
                }
            }
        }
    }

    /// Deliver the terminal notification. Failures are reported, never
    /// propagated.
    async fn notify(&mut self, notification: &Notification) -> Option<String> {
        let engine = self.engine;
        match engine.collaborators.notifier.notify(notification).await {
            Ok(()) => {
                info!(
                    kind = notification.kind(),
                    channel = ?notification.channel(),
                    "notification sent"
                );
                None
            }
            Err(err) => {
                error!(
                    kind = notification.kind(),
                    error = %err,
                    "notification delivery failed"
                );
                self.context.record_failure(&err);
                Some(err.to_string())
            }
        }
    }

    fn advance(&mut self, event: Event) -> Result<Transition, WorkflowError> {
        let from = self.machine.state();
        let transition = self.machine.apply(event)?;
        let to = self.machine.state();
        if from != to {
            debug!(%from, %to, "state transition");
            self.observer.on_transition(from, to);
        }
        Ok(transition)
    }

    fn report(
        &self,
        outcome: JobOutcome,
        records_stored: Option<usize>,
        notification_error: Option<String>,
        scheduler: &PollScheduler,
    ) -> RunReport {
        let completed_at = Utc::now();
        RunReport {
            outcome,
            context: self.context.clone(),
            state_transitions: self.machine.history(),
            dispatch_attempts: self.context.attempt(),
            backoff_waits: self.backoff_waits.clone(),
            polls: scheduler.polls(),
            poll_waited: scheduler.waited(),
            records_stored,
            notification_error,
            started_at: self.started_at,
            completed_at,
            duration_ms: (completed_at - self.started_at).num_milliseconds(),
        }
    }
}
