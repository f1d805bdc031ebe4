//! Stream termination and error types

use crate::tier::SecurityTier;
use serde::{Deserialize, Serialize};

/// Why a stream ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum Termination {
    /// Security handshake refused by the peer
    #[error("security handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Device refused or aborted the subscription
    #[error("subscription error: {0}")]
    DeviceRejected(String),

    /// Transport or framing failure
    #[error("stream protocol error: {0}")]
    Protocol(String),

    /// Stream ended cleanly
    #[error("stream closed")]
    Closed,
}

impl Termination {
    /// Whether the peer refused the security handshake
    #[inline]
    #[must_use]
    pub fn is_handshake_rejection(&self) -> bool {
        matches!(self, Self::HandshakeRejected(_))
    }

    /// Whether the stream ended without error
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Underlying message
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::HandshakeRejected(d) | Self::DeviceRejected(d) | Self::Protocol(d) => d,
            Self::Closed => "closed",
        }
    }
}

/// Stream client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Connection could not be established
    #[error("failed to open {tier} stream to {endpoint}: {reason}")]
    Open {
        /// Endpoint address
        endpoint: String,
        /// Requested tier
        tier: SecurityTier,
        /// Classified cause
        reason: Termination,
    },

    /// Subscription request failed
    #[error("subscribe failed: {0}")]
    Subscribe(Termination),

    /// Client already closed
    #[error("stream client is closed")]
    ClientClosed,
}

impl StreamError {
    /// Failure classified as a termination reason
    #[must_use]
    pub fn termination(&self) -> Termination {
        match self {
            Self::Open { reason, .. } | Self::Subscribe(reason) => reason.clone(),
            Self::ClientClosed => Termination::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_classifies_as_its_reason() {
        let err = StreamError::Open {
            endpoint: "router1:57400".into(),
            tier: SecurityTier::Strong,
            reason: Termination::HandshakeRejected("bad certificate".into()),
        };
        assert!(err.termination().is_handshake_rejection());
        assert!(err.to_string().contains("strong"));
    }

    #[test]
    fn termination_detail() {
        assert_eq!(Termination::DeviceRejected("unknown group".into()).detail(), "unknown group");
        assert!(Termination::Closed.is_clean());
    }
}
