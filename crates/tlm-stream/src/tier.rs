//! Security tiers and stream encodings

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Transport security level of a stream client
///
/// Ordered strongest first. A subscription may move down one tier, never up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityTier {
    /// TLS-protected transport
    Strong,
    /// Plaintext transport
    #[serde(rename = "none", alias = "unencrypted")]
    Unencrypted,
}

impl SecurityTier {
    /// Every tier, strongest first
    pub const ALL: [SecurityTier; 2] = [SecurityTier::Strong, SecurityTier::Unencrypted];

    /// Next lower tier, if any
    #[inline]
    #[must_use]
    pub fn fallback(self) -> Option<Self> {
        match self {
            Self::Strong => Some(Self::Unencrypted),
            Self::Unencrypted => None,
        }
    }

    /// Whether traffic at this tier is encrypted
    #[inline]
    #[must_use]
    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::Strong)
    }

    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Unencrypted => "none",
        }
    }
}

impl Display for SecurityTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strong" | "tls" => Ok(Self::Strong),
            "none" | "unencrypted" | "plaintext" => Ok(Self::Unencrypted),
            other => Err(format!("unknown security tier '{other}'")),
        }
    }
}

/// Record encoding requested from the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// JSON text
    #[default]
    #[serde(rename = "json")]
    Json,
    /// Self-describing key/value protobuf
    #[serde(rename = "gpb-kv")]
    GpbKeyValue,
    /// Compact protobuf
    #[serde(rename = "gpb")]
    Gpb,
}

impl Encoding {
    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::GpbKeyValue => "gpb-kv",
            Self::Gpb => "gpb",
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "gpb-kv" | "gpbkv" => Ok(Self::GpbKeyValue),
            "gpb" => Ok(Self::Gpb),
            other => Err(format!("unknown encoding '{other}'")),
        }
    }
}
