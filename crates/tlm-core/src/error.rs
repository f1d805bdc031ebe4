//! Error types for the subscription orchestrator
//!
//! Errors are `Clone` so the terminal outcome of a subscription can be
//! recorded once and handed to every caller that asks for it.

use crate::state::LifecycleState;
use tlm_config::ConfigError;
use tlm_stream::{SecurityTier, Termination};

/// Subscription error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Configuration transaction failed before streaming; nothing to revert
    #[error("subscription setup failed: {0}")]
    SetupFailed(#[source] ConfigError),

    /// Stream ended with an error that no fallback could recover
    #[error("stream failed at {tier} tier: {reason}")]
    Stream {
        /// Tier of the failing client
        tier: SecurityTier,
        /// Classified cause
        reason: Termination,
    },

    /// Reverting the configuration failed; the device may retain the
    /// subscription or the transport enablement
    #[error("teardown failed: {source}")]
    TeardownFailed {
        /// Device error from the revert commit
        source: ConfigError,
        /// Failure that triggered the teardown, if any
        cause: Option<Box<SubscriptionError>>,
    },

    /// Illegal lifecycle transition
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: LifecycleState,
        /// Requested state
        to: LifecycleState,
    },

    /// Orchestrator configuration is unusable
    #[error("orchestrator configuration error: {0}")]
    Config(#[from] OrchestratorConfigError),

    /// Driver task ended without recording an outcome
    #[error("subscription driver stopped unexpectedly")]
    DriverStopped,
}

impl SubscriptionError {
    /// Whether the device may still carry configuration from this subscription
    #[inline]
    #[must_use]
    pub fn leaves_residual_config(&self) -> bool {
        matches!(self, Self::TeardownFailed { .. })
    }

    /// Whether the stream itself failed, directly or as teardown cause
    #[must_use]
    pub fn stream_reason(&self) -> Option<&Termination> {
        match self {
            Self::Stream { reason, .. } => Some(reason),
            Self::TeardownFailed { cause: Some(cause), .. } => cause.stream_reason(),
            _ => None,
        }
    }
}

/// Orchestrator configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorConfigError {
    /// Configuration file could not be read
    #[error("failed to read {path}: {detail}")]
    Read {
        /// File path
        path: String,
        /// I/O error text
        detail: String,
    },

    /// Configuration text is not valid TOML for this schema
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_failure_keeps_stream_cause() {
        let err = SubscriptionError::TeardownFailed {
            source: ConfigError::commit("device busy"),
            cause: Some(Box::new(SubscriptionError::Stream {
                tier: SecurityTier::Unencrypted,
                reason: Termination::DeviceRejected("unknown sensor group".into()),
            })),
        };
        assert!(err.leaves_residual_config());
        assert_eq!(
            err.stream_reason(),
            Some(&Termination::DeviceRejected("unknown sensor group".into()))
        );
        assert!(err.to_string().contains("device busy"));
    }

    #[test]
    fn setup_failure_names_device_detail() {
        let err = SubscriptionError::SetupFailed(ConfigError::commit("data-exists"));
        assert_eq!(err.to_string(), "subscription setup failed: commit rejected: data-exists");
        assert!(!err.leaves_residual_config());
    }
}
