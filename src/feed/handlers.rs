//! Ordered handler registry

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smallvec::SmallVec;

/// Handlers kept in registration order.
///
/// Identity is the `Arc` allocation: registering the same `Arc` twice makes
/// it run twice, and unregistering it removes every registration.
pub struct HandlerRegistry<H: ?Sized> {
    handlers: Mutex<Vec<Arc<H>>>,
}

impl<H: ?Sized> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Arc<H>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, handler: Arc<H>) {
        self.guard().push(handler);
    }

    /// Remove every registration of `handler`; returns how many were removed
    pub fn unregister(&self, handler: &Arc<H>) -> usize {
        let mut handlers = self.guard();
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        before - handlers.len()
    }

    /// Copy of the current handlers, so they can run without the lock held
    pub fn snapshot(&self) -> SmallVec<[Arc<H>; 4]> {
        self.guard().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl<H: ?Sized> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

fn same_handler<H: ?Sized>(a: &Arc<H>, b: &Arc<H>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
