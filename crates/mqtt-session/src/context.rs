//! Explicit stand-in for the host's ambient "current iteration" state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State of one live run (virtual user + iteration) owned by the host.
#[derive(Debug)]
pub struct RunState {
    vu_id: u64,
    iteration: u64,
    expired: AtomicBool,
}

impl RunState {
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }
}

/// Handle to the caller's execution state, passed into every session
/// operation.
///
/// Clones share the same underlying state, so expiring one clone expires them
/// all. A context built with [`ExecutionContext::none`] models a call made
/// outside of any managed run.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    state: Option<Arc<RunState>>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(vu_id: u64, iteration: u64) -> Self {
        Self {
            state: Some(Arc::new(RunState {
                vu_id,
                iteration,
                expired: AtomicBool::new(false),
            })),
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self { state: None }
    }

    /// Marks the run as finished. Subsequent presence checks fail.
    pub fn expire(&self) {
        if let Some(state) = &self.state {
            state.expired.store(true, Ordering::Release);
        }
    }

    /// The presence check: `Some` only for a run that is still in progress.
    pub fn state(&self) -> Option<&RunState> {
        self.state
            .as_deref()
            .filter(|state| !state.expired.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state().is_some()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state() {
            Some(state) => f
                .debug_struct("ExecutionContext")
                .field("vu_id", &state.vu_id)
                .field("iteration", &state.iteration)
                .finish(),
            None => f.write_str("ExecutionContext(none)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_has_no_state() {
        let ctx = ExecutionContext::none();
        assert!(ctx.state().is_none());
        assert!(!ExecutionContext::default().is_active());
    }

    #[test]
    fn test_live_context() {
        let ctx = ExecutionContext::new(3, 7);
        let state = ctx.state().unwrap();
        assert_eq!(state.vu_id(), 3);
        assert_eq!(state.iteration(), 7);
    }

    #[test]
    fn test_expire_is_shared_by_clones() {
        let ctx = ExecutionContext::new(1, 0);
        let clone = ctx.clone();
        assert!(clone.is_active());

        ctx.expire();
        assert!(!ctx.is_active());
        assert!(!clone.is_active());
        assert_eq!(format!("{clone:?}"), "ExecutionContext(none)");
    }
}
