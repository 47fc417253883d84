//! Call-chain scoped context.
//!
//! A [`Scope`] is a LIFO stack of values (typically correlation ids) tied to
//! one logical call chain. The entry point of a unit of work pushes a value
//! with [`Scope::enter`] and the returned guard pops it on drop, so the value
//! is released on every exit path, early returns included.
//!
//! Scopes are explicit values passed through call chains, never process-wide
//! globals: two unrelated chains use two unrelated `Scope` instances and
//! cannot observe each other's values.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Scope carrying correlation ids, the common case.
pub type CorrelationScope = Scope<Uuid>;

/// A per-call-chain stack of context values.
///
/// Cloning a `Scope` yields a handle onto the *same* stack, which is how the
/// scope travels into spawned work belonging to the same chain.
#[derive(Debug, Clone)]
pub struct Scope<T> {
    stack: Arc<Mutex<Vec<T>>>,
}

impl<T> Scope<T> {
    /// Create an empty scope for a new call chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Push a value onto the scope, returning a guard that pops it on drop.
    #[must_use = "the value is popped when the guard drops"]
    pub fn enter(&self, value: T) -> ScopeGuard<T> {
        self.stack.lock().expect("scope lock poisoned").push(value);
        ScopeGuard {
            stack: Arc::clone(&self.stack),
        }
    }

    /// Number of values currently in scope.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.lock().expect("scope lock poisoned").len()
    }
}

impl<T: Clone> Scope<T> {
    /// The innermost value, if any.
    #[must_use]
    pub fn current(&self) -> Option<T> {
        self.stack
            .lock()
            .expect("scope lock poisoned")
            .last()
            .cloned()
    }
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationScope {
    /// Create a scope with a fresh correlation id already entered.
    ///
    /// Returns the scope and the guard holding the root id.
    #[must_use]
    pub fn with_correlation() -> (Self, ScopeGuard<Uuid>) {
        let scope = Self::new();
        let guard = scope.enter(Uuid::new_v4());
        (scope, guard)
    }
}

/// Guard that pops the matching scope value when dropped.
#[derive(Debug)]
pub struct ScopeGuard<T> {
    stack: Arc<Mutex<Vec<T>>>,
}

impl<T> Drop for ScopeGuard<T> {
    fn drop(&mut self) {
        self.stack.lock().expect("scope lock poisoned").pop();
    }
}
