use std::fmt;

use serde::{Deserialize, Serialize};

use super::context::JobOutcome;
use super::router::{Route, TerminalStatus};
use crate::error::WorkflowError;

/// States of the job workflow.
///
/// PREPARING → DISPATCHING → POLLING → one of
/// PERSISTING_RESULTS → NOTIFYING_SUCCESS → SUCCEEDED,
/// NOTIFYING_FAILURE → FAILED, or NOTIFYING_STOP → STOPPED.
/// Any non-terminal state can fall to ABORTED on a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Preparing,
    Dispatching,
    Polling,
    PersistingResults,
    NotifyingSuccess,
    NotifyingFailure,
    NotifyingStop,
    Succeeded,
    Stopped,
    Failed,
    Aborted,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Succeeded | State::Stopped | State::Failed | State::Aborted
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Preparing => write!(f, "PREPARING"),
            State::Dispatching => write!(f, "DISPATCHING"),
            State::Polling => write!(f, "POLLING"),
            State::PersistingResults => write!(f, "PERSISTING_RESULTS"),
            State::NotifyingSuccess => write!(f, "NOTIFYING_SUCCESS"),
            State::NotifyingFailure => write!(f, "NOTIFYING_FAILURE"),
            State::NotifyingStop => write!(f, "NOTIFYING_STOP"),
            State::Succeeded => write!(f, "SUCCEEDED"),
            State::Stopped => write!(f, "STOPPED"),
            State::Failed => write!(f, "FAILED"),
            State::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Something that happened while executing the current state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Prepared,
    /// A dispatch attempt failed and the retry policy allows another.
    DispatchRetry,
    Dispatched,
    Observed(Route),
    Persisted,
    /// The notification step ran, whether or not delivery succeeded.
    Notified,
    /// A fatal error ended the workflow.
    Fatal,
}

/// The result of applying an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next state.
    Next(State),
    /// Repeat the current state (dispatch retry, another poll).
    Stay(State),
    /// The workflow reached a terminal outcome.
    Complete(JobOutcome),
    /// A fatal error ended the workflow.
    Abort,
}

/// Tracks the current state of one workflow instance and enforces the
/// transition table.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: State,
    history: Vec<State>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: State::Preparing,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Every state visited so far, in order, including the current one.
    pub fn history(&self) -> Vec<State> {
        let mut states = self.history.clone();
        states.push(self.state);
        states
    }

    /// Apply `event` to the current state.
    ///
    /// Events that make no sense in the current state, and any event once a
    /// terminal state is reached, are rejected.
    pub fn apply(&mut self, event: Event) -> Result<Transition, WorkflowError> {
        let next = match (self.state, event) {
            (from, Event::Fatal) if !from.is_terminal() => State::Aborted,
            (State::Preparing, Event::Prepared) => State::Dispatching,
            (State::Dispatching, Event::DispatchRetry) => return Ok(Transition::Stay(self.state)),
            (State::Dispatching, Event::Dispatched) => State::Polling,
            (State::Polling, Event::Observed(route)) => match route {
                Route::ContinuePolling => return Ok(Transition::Stay(self.state)),
                Route::Terminal(TerminalStatus::Completed) => State::PersistingResults,
                Route::Terminal(TerminalStatus::Failed) => State::NotifyingFailure,
                Route::Terminal(TerminalStatus::Stopped) => State::NotifyingStop,
            },
            (State::PersistingResults, Event::Persisted) => State::NotifyingSuccess,
            (State::NotifyingSuccess, Event::Notified) => State::Succeeded,
            (State::NotifyingFailure, Event::Notified) => State::Failed,
            (State::NotifyingStop, Event::Notified) => State::Stopped,
            (from, event) => {
                return Err(WorkflowError::InvalidTransition {
                    from,
                    event: format!("{event:?}"),
                });
            }
        };

        self.history.push(self.state);
        self.state = next;

        Ok(match next {
            State::Succeeded => Transition::Complete(JobOutcome::Succeeded),
            State::Stopped => Transition::Complete(JobOutcome::Stopped),
            State::Failed => Transition::Complete(JobOutcome::Failed),
            State::Aborted => Transition::Abort,
            other => Transition::Next(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_polling() -> StateMachine {
        let mut sm = StateMachine::new();
        sm.apply(Event::Prepared).unwrap();
        sm.apply(Event::Dispatched).unwrap();
        assert_eq!(sm.state(), State::Polling);
        sm
    }

    #[test]
    fn completed_path_walks_all_states() {
        let mut sm = at_polling();
        let t = sm
            .apply(Event::Observed(Route::Terminal(TerminalStatus::Completed)))
            .unwrap();
        assert_eq!(t, Transition::Next(State::PersistingResults));
        let t = sm.apply(Event::Persisted).unwrap();
        assert_eq!(t, Transition::Next(State::NotifyingSuccess));
        let t = sm.apply(Event::Notified).unwrap();
        assert_eq!(t, Transition::Complete(JobOutcome::Succeeded));

        assert_eq!(
            sm.history(),
            vec![
                State::Preparing,
                State::Dispatching,
                State::Polling,
                State::PersistingResults,
                State::NotifyingSuccess,
                State::Succeeded,
            ]
        );
    }

    #[test]
    fn failed_status_goes_to_failure_notification() {
        let mut sm = at_polling();
        let t = sm
            .apply(Event::Observed(Route::Terminal(TerminalStatus::Failed)))
            .unwrap();
        assert_eq!(t, Transition::Next(State::NotifyingFailure));
        let t = sm.apply(Event::Notified).unwrap();
        assert_eq!(t, Transition::Complete(JobOutcome::Failed));
    }

    #[test]
    fn stopped_status_completes_as_stopped() {
        let mut sm = at_polling();
        sm.apply(Event::Observed(Route::Terminal(TerminalStatus::Stopped)))
            .unwrap();
        let t = sm.apply(Event::Notified).unwrap();
        assert_eq!(t, Transition::Complete(JobOutcome::Stopped));
        assert!(sm.state().is_terminal());
    }

    #[test]
    fn non_terminal_status_stays_in_polling() {
        let mut sm = at_polling();
        for _ in 0..3 {
            let t = sm.apply(Event::Observed(Route::ContinuePolling)).unwrap();
            assert_eq!(t, Transition::Stay(State::Polling));
        }
        assert_eq!(
            sm.history(),
            vec![State::Preparing, State::Dispatching, State::Polling]
        );
    }

    #[test]
    fn dispatch_retry_stays_in_dispatching() {
        let mut sm = StateMachine::new();
        sm.apply(Event::Prepared).unwrap();
        let t = sm.apply(Event::DispatchRetry).unwrap();
        assert_eq!(t, Transition::Stay(State::Dispatching));
        assert_eq!(sm.state(), State::Dispatching);
    }

    #[test]
    fn fatal_aborts_from_any_running_state() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(Event::Fatal).unwrap(), Transition::Abort);
        assert_eq!(sm.state(), State::Aborted);

        let mut sm = at_polling();
        sm.apply(Event::Observed(Route::Terminal(TerminalStatus::Completed)))
            .unwrap();
        assert_eq!(sm.apply(Event::Fatal).unwrap(), Transition::Abort);
    }

    #[test]
    fn terminal_states_reject_further_events() {
        let mut sm = at_polling();
        sm.apply(Event::Observed(Route::Terminal(TerminalStatus::Failed)))
            .unwrap();
        sm.apply(Event::Notified).unwrap();

        for event in [
            Event::Notified,
            Event::Persisted,
            Event::Fatal,
            Event::Observed(Route::Terminal(TerminalStatus::Completed)),
        ] {
            let err = sm.apply(event).unwrap_err();
            assert!(matches!(
                err,
                WorkflowError::InvalidTransition {
                    from: State::Failed,
                    ..
                }
            ));
        }
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let mut sm = StateMachine::new();
        assert!(sm.apply(Event::Dispatched).is_err());
        assert!(
            sm.apply(Event::Observed(Route::ContinuePolling)).is_err()
        );
        assert_eq!(sm.state(), State::Preparing);
    }

    #[test]
    fn state_display() {
        assert_eq!(State::Preparing.to_string(), "PREPARING");
        assert_eq!(State::PersistingResults.to_string(), "PERSISTING_RESULTS");
        assert_eq!(State::NotifyingStop.to_string(), "NOTIFYING_STOP");
        assert_eq!(State::Aborted.to_string(), "ABORTED");
    }
}
