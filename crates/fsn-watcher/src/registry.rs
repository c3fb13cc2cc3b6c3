//! Session arena keyed by [`SessionHandle`].
//!
//! Native sources never hold a reference to the session they feed. They are
//! given the session's handle as an opaque context, tag every batch with it,
//! and the dispatcher resolves the handle here. Once a session is
//! unregistered, late batches resolve to nothing and are dropped.
//!
//! # Locking
//!
//! Entries are [`Arc`]s handed out by clone; the lock is held only for the
//! map operation itself, never across a sink call.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::guard::InvalidGuard;
use crate::sink::CallbackSink;

/// Opaque handle naming one watch session.
///
/// Handles are never reused within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Returns the raw handle value, e.g. for handing to a host.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Rebuilds a handle from a raw value previously returned by [`get`].
    ///
    /// [`get`]: SessionHandle::get
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State shared between a session's controlling thread and its background
/// thread.
pub(crate) struct SessionShared {
    pub(crate) handle: SessionHandle,
    pub(crate) sink: Box<dyn CallbackSink>,
    pub(crate) guard: InvalidGuard,
}

impl SessionShared {
    pub(crate) fn new(handle: SessionHandle, sink: Box<dyn CallbackSink>) -> Self {
        Self {
            handle,
            sink,
            guard: InvalidGuard::new(),
        }
    }
}

impl fmt::Debug for SessionShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionShared")
            .field("handle", &self.handle)
            .field("invalid", &self.guard.is_set())
            .finish_non_exhaustive()
    }
}

/// Arena of live sessions.
#[derive(Debug)]
pub(crate) struct SessionRegistry {
    next: AtomicU64,
    entries: RwLock<FxHashMap<SessionHandle, Arc<SessionShared>>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    /// Hands out a handle that has never been used by this registry.
    pub(crate) fn allocate(&self) -> SessionHandle {
        SessionHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, shared: Arc<SessionShared>) {
        self.entries.write().insert(shared.handle, shared);
    }

    pub(crate) fn resolve(&self, handle: SessionHandle) -> Option<Arc<SessionShared>> {
        self.entries.read().get(&handle).map(Arc::clone)
    }

    pub(crate) fn unregister(&self, handle: SessionHandle) -> Option<Arc<SessionShared>> {
        self.entries.write().remove(&handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeEvent;
    use crate::sink::SinkError;

    fn shared(registry: &SessionRegistry) -> Arc<SessionShared> {
        let sink = |_: &ChangeEvent| -> Result<(), SinkError> { Ok(()) };
        Arc::new(SessionShared::new(registry.allocate(), Box::new(sink)))
    }

    #[test]
    fn test_handles_are_unique() {
        let registry = SessionRegistry::new();
        let a = registry.allocate();
        let b = registry.allocate();
        assert_ne!(a, b);
        assert_eq!(a.get(), 1);
        assert_eq!(SessionHandle::from_raw(b.get()), b);
    }

    #[test]
    fn test_resolve_after_unregister_is_none() {
        let registry = SessionRegistry::new();
        let entry = shared(&registry);
        let handle = entry.handle;

        registry.register(entry);
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(handle).is_some());

        assert!(registry.unregister(handle).is_some());
        assert!(registry.resolve(handle).is_none());
        assert!(registry.unregister(handle).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionHandle::from_raw(7).to_string(), "#7");
    }
}
