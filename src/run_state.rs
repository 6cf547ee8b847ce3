use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::breaker::CircuitBreaker;
use crate::models::{RunOutcome, RunState, RunStatus};

/// Shared, lock-protected [`RunState`] plus the cooperative stop flag.
///
/// The lock is only taken for short synchronous updates, never across an
/// `.await`.
#[derive(Clone, Default)]
pub struct RunStateHandle {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    state: RunState,
    stop_requested: bool,
}

impl RunStateHandle {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> RunState {
        self.lock().state.clone()
    }

    /// Move to WORKING with fresh counters, unless a run is already active
    pub fn try_begin(&self, session_id: DateTime<Utc>) -> Option<RunState> {
        let mut inner = self.lock();
        if inner.state.status == RunStatus::Working {
            return None;
        }

        inner.stop_requested = false;
        inner.state = RunState {
            status: RunStatus::Working,
            session_id: Some(session_id),
            ..RunState::default()
        };
        Some(inner.state.clone())
    }

    /// Move to STOPPED and record how the run ended
    pub fn finish(&self, outcome: RunOutcome) -> RunState {
        let mut inner = self.lock();
        inner.state.status = RunStatus::Stopped;
        inner.state.last_outcome = Some(outcome);
        inner.stop_requested = false;
        inner.state.clone()
    }

    /// Returns `false` when no run is active
    pub fn request_stop(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.status != RunStatus::Working {
            return false;
        }
        inner.stop_requested = true;
        true
    }

    /// Whether the active run should keep going
    pub fn should_continue(&self) -> bool {
        let inner = self.lock();
        inner.state.status == RunStatus::Working && !inner.stop_requested
    }

    pub fn is_working(&self) -> bool {
        self.lock().state.status == RunStatus::Working
    }

    pub fn session_id(&self) -> Option<DateTime<Utc>> {
        self.lock().state.session_id
    }

    pub fn update(&self, f: impl FnOnce(&mut RunState)) {
        f(&mut self.lock().state);
    }

    /// Copy the breaker's failure counters into the observable state
    pub fn sync_breaker(&self, breaker: &CircuitBreaker) {
        self.update(|state| {
            state.error_count_total = breaker.total_failures();
            state.error_count_consecutive = breaker.consecutive_failures();
        });
    }
}
