//! Identifiers and status snapshots

use crate::error::SubscriptionError;
use crate::state::LifecycleState;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use tlm_stream::SecurityTier;
use ulid::Ulid;

/// Device-side subscription identifier
///
/// Generated as `<prefix>-<ULID>`: time-ordered with random suffix, so
/// concurrent orchestrators collide only with negligible probability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Generate new id
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Ulid::new()))
    }

    /// Wrap an existing identifier
    #[inline]
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Snapshot of a running subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatus {
    /// Lifecycle state
    pub state: LifecycleState,
    /// Tier of the current (or last) stream client
    pub tier: SecurityTier,
    /// Records delivered so far
    pub records: u64,
    /// Whether the one-shot downgrade was used
    pub downgraded: bool,
    /// Whether this subscription enabled the transport and must disable it
    pub owns_transport_enable: bool,
    /// Terminal outcome, once `Closed`
    pub outcome: Option<Result<(), SubscriptionError>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_differ() {
        let a = SubscriptionId::generate("anx");
        let b = SubscriptionId::generate("anx");
        assert!(a.as_str().starts_with("anx-"));
        assert_eq!(a.as_str().len(), "anx-".len() + 26);
        assert_ne!(a, b);
    }
}
