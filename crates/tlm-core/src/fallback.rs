//! Security fallback decision

use serde::{Deserialize, Serialize};
use tlm_stream::{SecurityTier, Termination};

/// What to do about a stream termination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Retry the same subscription at the given lower tier
    Downgrade(SecurityTier),
    /// Report the termination and tear down
    Surface,
}

/// One-shot security downgrade policy
///
/// A downgrade happens only for a handshake rejection, from a tier that has
/// a fallback, before any record arrived, and at most once per subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    /// Whether downgrading is permitted at all
    pub allow_downgrade: bool,
}

impl FallbackPolicy {
    /// Policy with downgrade enabled or disabled
    #[inline]
    #[must_use]
    pub fn new(allow_downgrade: bool) -> Self {
        Self { allow_downgrade }
    }

    /// Decide on `reason` for a client at `tier`
    #[must_use]
    pub fn decide(
        &self,
        reason: &Termination,
        tier: SecurityTier,
        already_downgraded: bool,
        records_delivered: u64,
    ) -> FallbackDecision {
        if !self.allow_downgrade
            || already_downgraded
            || records_delivered > 0
            || !reason.is_handshake_rejection()
        {
            return FallbackDecision::Surface;
        }
        tier.fallback()
            .map_or(FallbackDecision::Surface, FallbackDecision::Downgrade)
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}
