use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque reference to an established session.
///
/// Only the [`SessionManager`](super::SessionManager) that issued a handle can
/// resolve it. Handles are never reused within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

pub(crate) struct SessionTable<S> {
    next_id: AtomicU64,
    entries: Mutex<HashMap<SessionHandle, S>>,
}

impl<S> SessionTable<S> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, session: S) -> SessionHandle {
        let handle = SessionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().insert(handle, session);
        handle
    }

    pub(crate) fn remove(&self, handle: SessionHandle) -> Option<S> {
        self.entries.lock().remove(&handle)
    }

    pub(crate) fn with<R>(&self, handle: SessionHandle, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.entries.lock().get(&handle).map(f)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let table = SessionTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);

        assert_eq!(table.remove(a), Some("a"));
        assert_eq!(table.remove(a), None);
        assert_eq!(table.with(b, |s| s.len()), Some(1));

        let c = table.insert("c");
        assert_ne!(c, a);
        assert_eq!(c.to_string(), format!("session-{}", c.id()));
    }
}
