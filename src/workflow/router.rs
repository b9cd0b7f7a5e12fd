use serde::{Deserialize, Serialize};

/// A probed status that ends polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    Completed,
    Failed,
    Stopped,
}

/// Where the workflow goes after observing a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ContinuePolling,
    Terminal(TerminalStatus),
}

/// Classifies probed status strings.
pub struct OutcomeRouter;

impl OutcomeRouter {
    /// Exact, case-sensitive match on the three terminal statuses. Everything
    /// else, including empty and unknown strings, keeps the poll loop going.
    pub fn route(status: &str) -> Route {
        match status {
            "Completed" => Route::Terminal(TerminalStatus::Completed),
            "Failed" => Route::Terminal(TerminalStatus::Failed),
            "Stopped" => Route::Terminal(TerminalStatus::Stopped),
            _ => Route::ContinuePolling,
        }
    }
}
