//! Session store - explicit registry of runs
//!
//! Owned by the embedding caller (an HTTP layer, the CLI) and handed to
//! whatever needs visibility into running sessions. The runner itself never
//! touches it; runs are registered around the call, keeping the loop free
//! of ambient global state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::state::RunOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

struct RunEntry {
    status: RunStatus,
    cancel: CancellationToken,
    outcome: Option<RunOutcome>,
    error: Option<String>,
    started_at: DateTime<Utc>,
}

/// Concurrent registry of runs keyed by run id.
#[derive(Default)]
pub struct SessionStore {
    runs: DashMap<Uuid, RunEntry>,
}

/// Point-in-time view of one registered run.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run about to start. Returns the token the caller hands
    /// to the runner; cancelling it kills the run's session.
    pub fn register(&self, id: Uuid) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.runs.insert(
            id,
            RunEntry {
                status: RunStatus::Running,
                cancel: cancel.clone(),
                outcome: None,
                error: None,
                started_at: Utc::now(),
            },
        );
        cancel
    }

    pub fn complete(&self, id: Uuid, outcome: RunOutcome) {
        if let Some(mut entry) = self.runs.get_mut(&id) {
            entry.status = RunStatus::Completed;
            entry.outcome = Some(outcome);
        }
    }

    pub fn fail(&self, id: Uuid, error: String) {
        if let Some(mut entry) = self.runs.get_mut(&id) {
            // A cancelled run also surfaces as an error; keep the original
            // cancelled status.
            if entry.status == RunStatus::Running {
                entry.status = RunStatus::Failed;
            }
            entry.error = Some(error);
        }
    }

    /// Request cancellation. Returns false when the run is unknown or
    /// already finished.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.runs.get_mut(&id) {
            Some(mut entry) if entry.status == RunStatus::Running => {
                entry.status = RunStatus::Cancelled;
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, id: Uuid) -> Option<RunStatus> {
        self.runs.get(&id).map(|entry| entry.status)
    }

    /// Take a finished run's outcome, leaving the entry for status queries.
    pub fn take_outcome(&self, id: Uuid) -> Option<RunOutcome> {
        self.runs.get_mut(&id).and_then(|mut entry| entry.outcome.take())
    }

    pub fn list(&self) -> Vec<RunInfo> {
        self.runs
            .iter()
            .map(|entry| RunInfo {
                id: *entry.key(),
                status: entry.status,
                started_at: entry.started_at,
                error: entry.error.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lifecycle_running_to_completed() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let _token = store.register(id);
        assert_eq!(store.status(id), Some(RunStatus::Running));

        store.complete(id, RunOutcome::default());
        assert_eq!(store.status(id), Some(RunStatus::Completed));
        assert!(store.take_outcome(id).is_some());
        // Outcome is taken once; status remains queryable.
        assert!(store.take_outcome(id).is_none());
        assert_eq!(store.status(id), Some(RunStatus::Completed));
    }

    #[test]
    fn cancel_triggers_token_once() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let token = store.register(id);
        assert!(!token.is_cancelled());

        assert!(store.cancel(id));
        assert!(token.is_cancelled());
        assert_eq!(store.status(id), Some(RunStatus::Cancelled));
        // Second cancel is a no-op.
        assert!(!store.cancel(id));

        // A later failure report keeps the cancelled status.
        store.fail(id, "session killed".to_string());
        assert_eq!(store.status(id), Some(RunStatus::Cancelled));
    }

    #[test]
    fn unknown_runs_are_not_cancellable() {
        let store = SessionStore::new();
        assert!(!store.cancel(Uuid::new_v4()));
        assert_eq!(store.status(Uuid::new_v4()), None);
    }
}
