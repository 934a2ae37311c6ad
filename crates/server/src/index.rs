use serde::Serialize;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Status record returned by `context.index_control`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub is_indexing: bool,
    pub phase: String,
    pub files_total: usize,
    pub files_done: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for IndexStatus {
    fn default() -> Self {
        Self {
            is_indexing: false,
            phase: "idle".to_string(),
            files_total: 0,
            files_done: 0,
            last_error: None,
        }
    }
}

/// Shared indexing state machine. The indexing worker itself is external;
/// the server tracks lifecycle transitions and drives re-embedding runs
/// through the vector-store adapter.
pub struct IndexState {
    status: Mutex<IndexStatus>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl IndexState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: Mutex::new(IndexStatus::default()),
            cancel: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> IndexStatus {
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Transition into an indexing run. Returns the run's cancellation
    /// token, or `None` when a run is already active.
    pub fn try_begin(&self, phase: &str, files_total: usize) -> Option<CancellationToken> {
        let mut status = self.lock_status();
        if status.is_indexing {
            return None;
        }
        *status = IndexStatus {
            is_indexing: true,
            phase: phase.to_string(),
            files_total,
            files_done: 0,
            last_error: None,
        };
        let token = CancellationToken::new();
        *self.lock_cancel() = Some(token.clone());
        Some(token)
    }

    pub fn progress(&self, files_done: usize) {
        let mut status = self.lock_status();
        status.files_done = files_done;
    }

    pub fn finish(&self, error: Option<String>) {
        let mut status = self.lock_status();
        status.is_indexing = false;
        status.phase = if error.is_some() {
            "failed".to_string()
        } else {
            "idle".to_string()
        };
        status.last_error = error;
        *self.lock_cancel() = None;
    }

    /// Request cancellation of the active run. Returns whether one existed.
    pub fn request_stop(&self) -> bool {
        let cancel = self.lock_cancel();
        match cancel.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, IndexStatus> {
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for IndexState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_progress_finish_cycle() {
        let state = IndexState::new();
        assert!(!state.snapshot().is_indexing);

        let token = state.try_begin("reindex", 10).unwrap();
        assert!(state.snapshot().is_indexing);
        assert_eq!(state.snapshot().files_total, 10);
        assert!(state.try_begin("again", 1).is_none());

        state.progress(4);
        assert_eq!(state.snapshot().files_done, 4);

        state.finish(None);
        let done = state.snapshot();
        assert!(!done.is_indexing);
        assert_eq!(done.phase, "idle");
        assert!(!token.is_cancelled());
    }

    #[test]
    fn stop_cancels_the_active_run() {
        let state = IndexState::new();
        assert!(!state.request_stop());

        let token = state.try_begin("reindex", 1).unwrap();
        assert!(state.request_stop());
        assert!(token.is_cancelled());
    }

    #[test]
    fn failures_are_recorded() {
        let state = IndexState::new();
        state.try_begin("reindex", 1).unwrap();
        state.finish(Some("embedder unreachable".to_string()));
        let status = state.snapshot();
        assert_eq!(status.phase, "failed");
        assert_eq!(status.last_error.as_deref(), Some("embedder unreachable"));
    }
}
