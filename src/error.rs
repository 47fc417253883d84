//! Error classification.
//!
//! Every failure surfaced by the runtime carries a [`Classification`] so the
//! caller can pick a policy without matching on concrete error types:
//! conflicts are reload-and-retry, infrastructure failures are retryable,
//! programming defects are not.

/// Coarse origin tag attached to runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Optimistic concurrency conflict. Reload the aggregate and retry.
    Conflict,
    /// A referenced aggregate, snapshot, or type was not found.
    NotFound,
    /// No handler registered for a command or event. A configuration defect;
    /// retrying cannot help.
    MissingHandler,
    /// Storage or I/O failure. Retryable by the caller, never retried here.
    Infrastructure,
    /// A value object was rejected at construction.
    Validation,
}

impl Classification {
    /// Whether retrying the same operation unchanged can ever succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Infrastructure)
    }
}

/// Errors that expose their [`Classification`].
pub trait Classify {
    /// The classification of this error.
    fn classification(&self) -> Classification;
}
