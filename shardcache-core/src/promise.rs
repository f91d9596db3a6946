//! Single-assignment promise used by the cache façade's batch mode.

use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors raised by [`Promise::resolve`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromiseError {
    /// `resolve` was called on a promise that was already resolved.
    #[error("promise is no longer pending")]
    AlreadyResolved,
}

enum State<T> {
    Pending(Vec<Box<dyn FnOnce(&T) + Send>>),
    Resolved(T),
}

/// A value that starts out absent and is assigned exactly once.
///
/// Mirrors the batch driver's contract: no rejection state exists, because
/// failures are raised synchronously by the drain routine rather than
/// carried through the promise. Callbacks registered while pending run in
/// registration order when `resolve` is called; callbacks registered after
/// resolution run immediately.
pub struct Promise<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    /// Creates a new, pending promise.
    pub fn new() -> Self {
        Promise {
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
        }
    }

    /// `true` while no value has been assigned yet.
    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Pending(_))
    }

    /// `true` once a value has been assigned.
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Resolved(_))
    }

    /// Registers a callback to run with the resolved value.
    ///
    /// If the promise is already resolved the callback runs immediately,
    /// synchronously, before this call returns.
    pub fn then(&self, callback: impl FnOnce(&T) + Send + 'static) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Pending(callbacks) => callbacks.push(Box::new(callback)),
            State::Resolved(value) => callback(value),
        }
    }
}

impl<T: Clone> Promise<T> {
    /// Returns the resolved value, or `None` while still pending.
    pub fn value(&self) -> Option<T> {
        match &*self.state.lock().unwrap() {
            State::Pending(_) => None,
            State::Resolved(value) => Some(value.clone()),
        }
    }
}

impl<T> Promise<T> {
    /// Assigns `value`, transitioning from pending to resolved and draining
    /// any callbacks registered so far, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::AlreadyResolved`] if called a second time;
    /// the transition is one-way and single-assignment.
    pub fn resolve(&self, value: T) -> Result<(), PromiseError> {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, State::Resolved(value)) {
                State::Pending(callbacks) => callbacks,
                previous @ State::Resolved(_) => {
                    *state = previous;
                    return Err(PromiseError::AlreadyResolved);
                }
            }
        };
        let state = self.state.lock().unwrap();
        if let State::Resolved(value) = &*state {
            for callback in callbacks {
                callback(value);
            }
        }
        Ok(())
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock().unwrap() {
            State::Pending(_) => write!(f, "Promise(pending)"),
            State::Resolved(value) => write!(f, "Promise({value:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn starts_pending_with_no_value() {
        let p: Promise<&str> = Promise::new();
        assert!(p.is_pending());
        assert!(!p.is_resolved());
        assert_eq!(p.value(), None);
    }

    #[test]
    fn resolve_flips_state_and_stores_value() {
        let p = Promise::new();
        p.resolve("value").unwrap();
        assert!(!p.is_pending());
        assert!(p.is_resolved());
        assert_eq!(p.value(), Some("value"));
    }

    #[test]
    fn double_resolve_is_an_error() {
        let p = Promise::new();
        p.resolve(1).unwrap();
        assert_eq!(p.resolve(2), Err(PromiseError::AlreadyResolved));
        assert_eq!(p.value(), Some(1));
    }

    #[test]
    fn callback_fires_on_resolve_in_registration_order() {
        let p = Promise::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = Arc::clone(&order);
            p.then(move |_| order.lock().unwrap().push(tag));
        }
        p.resolve("v").unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn callback_registered_after_resolve_fires_immediately() {
        let p = Promise::new();
        p.resolve(42).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        p.then(move |v| {
            assert_eq!(*v, 42);
            fired2.store(true, Ordering::SeqCst);
        });
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn is_pending_and_is_resolved_are_never_both_true() {
        let p = Promise::new();
        assert_ne!(p.is_pending(), !p.is_resolved());
        p.resolve(()).unwrap();
        assert_ne!(p.is_pending(), !p.is_resolved());
    }
}
