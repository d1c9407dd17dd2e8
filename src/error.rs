//! Shared error types for the resource-matching core.
//!
//! Every fallible API in this crate returns [`CoreError`]. The variants are
//! grouped by the failure categories spec'd for the system, not by the
//! subsystem that raises them — a caller deciding how to react (retry,
//! surface to the user, treat as a bug) cares about the category, not
//! which internal module noticed it first.
//!
//! # Propagation policy
//! * `select` returns failure without mutating the graph.
//! * `update` rolls back any exclusive spans it already recorded for the
//!   current job before returning an error (see [`crate::traverser`]).
//! * `remove` is best-effort: callers get the *last* error, having already
//!   applied every removal that did succeed.

use thiserror::Error;

/// Top-level error type for the resource-matching core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Jobspec schema violation, malformed constraint, unknown resource
    /// type, or an `R` document inconsistent with the graph it targets.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A quantity fell outside what the receiving planner/filter/count
    /// expression could represent — requested more than available, or a
    /// total was lowered below current usage.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A search or lookup had no result: no schedulable point, an unknown
    /// vertex path, or cancellation of a job id nobody holds.
    #[error("not found: {0}")]
    NotFound(String),

    /// Allocation of internal bookkeeping (scoring groups, emitted JSON
    /// nodes) failed.
    #[error("resource exhaustion: {0}")]
    OutOfMemory(String),

    /// The operation is not implemented by the component handling it
    /// (e.g. a reader that cannot service a partial cancel).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An internal invariant was violated — planner corruption, a missing
    /// `x_checker`, or a trav-token mismatch during `update`. These should
    /// never happen; seeing one means a bug in this crate, not bad input.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        CoreError::InvalidInput(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        CoreError::OutOfRange(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        CoreError::Unsupported(msg.into())
    }

    /// `true` for errors that leave graph/planner state unchanged (the
    /// caller can safely retry with different parameters).
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidInput(_) | CoreError::NotFound(_) | CoreError::OutOfRange(_)
        )
    }
}

/// Append-only error-message buffer kept per [`crate::traverser::Traverser`],
/// mirroring the "user-visible: an append-only error-message buffer per
/// traverser, cleared explicitly by the caller" requirement.
#[derive(Debug, Default, Clone)]
pub struct ErrorLog {
    messages: Vec<String>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: &CoreError) {
        self.messages.push(err.to_string());
    }

    pub fn push_msg(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }

    /// Last message pushed, if any (used by `find`, which "reports the
    /// last message" after continuing past per-vertex failures).
    pub fn last(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }

    pub fn all(&self) -> &[String] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_reports_last_message() {
        let mut log = ErrorLog::new();
        assert!(log.last().is_none());
        log.push(&CoreError::invalid_input("bad jobspec"));
        log.push(&CoreError::not_found("no such vertex"));
        assert_eq!(log.last(), Some("not found: no such vertex"));
        assert_eq!(log.all().len(), 2);
    }

    #[test]
    fn error_log_clear_empties_buffer() {
        let mut log = ErrorLog::new();
        log.push_msg("oops");
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn is_pure_classifies_categories() {
        assert!(CoreError::invalid_input("x").is_pure());
        assert!(CoreError::not_found("x").is_pure());
        assert!(CoreError::out_of_range("x").is_pure());
        assert!(!CoreError::internal("x").is_pure());
        assert!(!CoreError::unsupported("x").is_pure());
    }
}
