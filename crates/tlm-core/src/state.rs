//! Subscription lifecycle states and their allowed transitions

use crate::error::SubscriptionError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use tlm_stream::SecurityTier;

/// Lifecycle of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    /// Nothing done yet
    Idle,
    /// Configuration transaction in progress
    Preparing,
    /// Stream client opened at a tier, no record yet
    Subscribing(SecurityTier),
    /// At least one record delivered
    Active,
    /// Closing the stream and reverting configuration
    TearingDown,
    /// Terminal
    Closed,
}

impl LifecycleState {
    /// Every state, for exhaustive checks
    pub const ALL: [LifecycleState; 7] = [
        LifecycleState::Idle,
        LifecycleState::Preparing,
        LifecycleState::Subscribing(SecurityTier::Strong),
        LifecycleState::Subscribing(SecurityTier::Unencrypted),
        LifecycleState::Active,
        LifecycleState::TearingDown,
        LifecycleState::Closed,
    ];

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether a stream client may be streaming in this state
    #[inline]
    #[must_use]
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Subscribing(_) | Self::Active)
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Preparing => f.write_str("preparing"),
            Self::Subscribing(tier) => write!(f, "subscribing({tier})"),
            Self::Active => f.write_str("active"),
            Self::TearingDown => f.write_str("tearing-down"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Validates a state transition
///
/// # Errors
/// [`SubscriptionError::InvalidTransition`] if `to` is not reachable from `from`
pub fn validate_transition(from: LifecycleState, to: LifecycleState) -> Result<(), SubscriptionError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(SubscriptionError::InvalidTransition { from, to })
    }
}

/// States directly reachable from `from`
#[must_use]
pub fn allowed_transitions(from: LifecycleState) -> Vec<LifecycleState> {
    use LifecycleState::{Active, Closed, Idle, Preparing, Subscribing, TearingDown};
    use SecurityTier::{Strong, Unencrypted};
    match from {
        Idle => vec![Preparing, Closed],
        Preparing => vec![Subscribing(Strong), Subscribing(Unencrypted), TearingDown, Closed],
        Subscribing(Strong) => vec![Subscribing(Unencrypted), Active, TearingDown],
        Subscribing(Unencrypted) => vec![Active, TearingDown],
        Active => vec![TearingDown],
        TearingDown => vec![Closed],
        Closed => vec![],
    }
}

fn allowed(from: LifecycleState, to: LifecycleState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
