//! Error taxonomy for the analytics core.
//!
//! Four failure classes with different propagation rules:
//!
//! - [`AdherenceError::NotFound`]: surfaced to the caller, not retried.
//! - [`AdherenceError::EmptyHistory`]: "insufficient data", not a failure;
//!   callers render an empty state instead of a zero-adherence pattern.
//! - [`AdherenceError::ExternalService`]: completion-service failures;
//!   always contained inside the suggestion engine and degraded to
//!   rule-based-only output, never propagated to the end user.
//! - [`AdherenceError::Persistence`]: storage failures; propagated, except
//!   that suggestion persistence is best-effort (the computed batch is
//!   still returned).

use thiserror::Error;

/// Errors produced by pattern analysis, suggestion generation, and the
/// suggestion lifecycle.
#[derive(Debug, Error)]
pub enum AdherenceError {
    /// Referenced medication does not exist.
    #[error("medication '{medication_id}' not found")]
    NotFound {
        /// The missing medication.
        medication_id: String,
    },

    /// Zero dose logs inside the analysis window. Insufficient data, not a
    /// zero-adherence pattern.
    #[error("no dose logs in the last {window_days} days for medication '{medication_id}'")]
    EmptyHistory {
        /// The medication with no history.
        medication_id: String,
        /// The window that was inspected.
        window_days: u32,
    },

    /// The text-completion service failed (timeout, non-2xx, malformed
    /// payload, connection refused).
    #[error("text-completion service failed: {0}")]
    ExternalService(String),

    /// The suggestion store or dose-log store failed.
    #[error("storage error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl AdherenceError {
    /// Is this the "insufficient data" case rather than a real failure?
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, AdherenceError::EmptyHistory { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history_is_insufficient_data() {
        let err = AdherenceError::EmptyHistory {
            medication_id: "med-1".to_string(),
            window_days: 30,
        };
        assert!(err.is_insufficient_data());

        let err = AdherenceError::NotFound {
            medication_id: "med-1".to_string(),
        };
        assert!(!err.is_insufficient_data());
    }

    #[test]
    fn test_messages_name_the_medication() {
        let err = AdherenceError::NotFound {
            medication_id: "med-9".to_string(),
        };
        assert!(err.to_string().contains("med-9"));

        let err = AdherenceError::EmptyHistory {
            medication_id: "med-9".to_string(),
            window_days: 30,
        };
        assert!(err.to_string().contains("30 days"));
    }
}
