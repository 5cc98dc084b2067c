//! Error types for admission and credential operations.

use thiserror::Error;

/// Errors produced by the admission controller and token cache.
///
/// Admission rejection is deliberately absent: running out of capacity is
/// normal control flow and is reported as `None` / [`CallOutcome::Rejected`].
///
/// [`CallOutcome::Rejected`]: crate::core::CallOutcome::Rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Invalid capacity or TTL supplied at construction.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Ticket is not outstanding on this controller (already released or foreign).
    #[error("ticket {ticket} is not outstanding on this controller")]
    DoubleRelease {
        /// Sequence number of the offending ticket.
        ticket: u64,
    },
    /// The credential issuer failed for an identity.
    #[error("credential issuance failed for `{identity}`: {reason}")]
    Issuance {
        /// Identity whose refresh failed.
        identity: String,
        /// Message reported by the issuer.
        reason: String,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GateError::Config("slot_capacity must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: slot_capacity must be greater than 0"
        );

        let err = GateError::DoubleRelease { ticket: 7 };
        assert_eq!(err.to_string(), "ticket 7 is not outstanding on this controller");

        let err = GateError::Issuance {
            identity: "agent_1".into(),
            reason: "timeout".into(),
        };
        assert_eq!(
            err.to_string(),
            "credential issuance failed for `agent_1`: timeout"
        );
    }

    #[test]
    fn test_error_converts_into_anyhow() {
        fn fails() -> AppResult<()> {
            Err::<(), _>(GateError::DoubleRelease { ticket: 1 })?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(err.downcast_ref::<GateError>().is_some());
    }
}
