//! Orchestrator configuration

use crate::error::OrchestratorConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tlm_config::telemetry::DEFAULT_TRANSPORT_PORT;
use tlm_stream::{Encoding, SecurityTier};

/// Default subscription id prefix
pub const DEFAULT_ID_PREFIX: &str = "anx";

/// Default sampling interval in milliseconds
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 15_000;

/// Orchestrator configuration
///
/// Every field has a default, so a TOML file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Prefix of generated subscription identifiers
    pub id_prefix: String,
    /// Sampling interval written to the subscription's sensor profile
    pub sample_interval_ms: u64,
    /// Record encoding requested on subscribe
    pub encoding: Encoding,
    /// Tier of the first stream client
    pub initial_tier: SecurityTier,
    /// Whether a rejected handshake may fall back to a lower tier
    pub allow_downgrade: bool,
    /// Transport port assumed when the device configures none
    pub default_port: u16,
    /// Bound of the measurement buffer; `None` keeps every record
    pub max_buffered: Option<usize>,
}

impl OrchestratorConfig {
    /// Create default config
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set id prefix
    #[inline]
    #[must_use]
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Set sample interval
    #[inline]
    #[must_use]
    pub fn with_sample_interval_ms(mut self, interval: u64) -> Self {
        self.sample_interval_ms = interval;
        self
    }

    /// Set encoding
    #[inline]
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set initial tier
    #[inline]
    #[must_use]
    pub fn with_initial_tier(mut self, tier: SecurityTier) -> Self {
        self.initial_tier = tier;
        self
    }

    /// Enable or disable downgrade
    #[inline]
    #[must_use]
    pub fn with_downgrade(mut self, allow: bool) -> Self {
        self.allow_downgrade = allow;
        self
    }

    /// Set default transport port
    #[inline]
    #[must_use]
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Set measurement buffer bound
    #[inline]
    #[must_use]
    pub fn with_max_buffered(mut self, max: Option<usize>) -> Self {
        self.max_buffered = max;
        self
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// [`OrchestratorConfigError::Parse`] or [`OrchestratorConfigError::Invalid`]
    pub fn from_toml_str(text: &str) -> Result<Self, OrchestratorConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| OrchestratorConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// [`OrchestratorConfigError::Read`] when the file cannot be read, else
    /// as [`from_toml_str`](Self::from_toml_str)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OrchestratorConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| OrchestratorConfigError::Read {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// [`OrchestratorConfigError::Parse`] if serialization fails
    pub fn to_toml_string(&self) -> Result<String, OrchestratorConfigError> {
        toml::to_string_pretty(self).map_err(|e| OrchestratorConfigError::Parse(e.to_string()))
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`OrchestratorConfigError::Invalid`] naming the first bad value
    pub fn validate(&self) -> Result<(), OrchestratorConfigError> {
        let prefix_ok = !self.id_prefix.is_empty()
            && self.id_prefix.len() <= 32
            && self
                .id_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !prefix_ok {
            return Err(OrchestratorConfigError::Invalid(format!(
                "id_prefix '{}' must be 1-32 alphanumeric, '-' or '_' characters",
                self.id_prefix
            )));
        }
        if self.sample_interval_ms == 0 {
            return Err(OrchestratorConfigError::Invalid(
                "sample_interval_ms must be positive".to_string(),
            ));
        }
        if self.default_port == 0 {
            return Err(OrchestratorConfigError::Invalid(
                "default_port must be in 1-65535".to_string(),
            ));
        }
        if self.max_buffered == Some(0) {
            return Err(OrchestratorConfigError::Invalid(
                "max_buffered must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            encoding: Encoding::Json,
            initial_tier: SecurityTier::Strong,
            allow_downgrade: true,
            default_port: DEFAULT_TRANSPORT_PORT,
            max_buffered: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.id_prefix, "anx");
        assert_eq!(config.sample_interval_ms, 15_000);
        assert_eq!(config.encoding, Encoding::Json);
        assert_eq!(config.initial_tier, SecurityTier::Strong);
        assert!(config.allow_downgrade);
        assert_eq!(config.default_port, 57400);
        assert_eq!(config.max_buffered, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            sample_interval_ms = 5000
            initial_tier = "none"
            encoding = "gpb-kv"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            OrchestratorConfig::default()
                .with_sample_interval_ms(5000)
                .with_initial_tier(SecurityTier::Unencrypted)
                .with_encoding(Encoding::GpbKeyValue)
        );
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        assert!(matches!(
            OrchestratorConfig::from_toml_str("sample_rate = 1"),
            Err(OrchestratorConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_values() {
        for config in [
            OrchestratorConfig::default().with_id_prefix(""),
            OrchestratorConfig::default().with_id_prefix("a b"),
            OrchestratorConfig::default().with_sample_interval_ms(0),
            OrchestratorConfig::default().with_default_port(0),
            OrchestratorConfig::default().with_max_buffered(Some(0)),
        ] {
            assert!(matches!(config.validate(), Err(OrchestratorConfigError::Invalid(_))));
        }
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id_prefix = \"lab\"\nallow_downgrade = false").unwrap();
        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.id_prefix, "lab");
        assert!(!config.allow_downgrade);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            OrchestratorConfig::from_file(dir.path().join("absent.toml")),
            Err(OrchestratorConfigError::Read { .. })
        ));
    }

    #[test]
    fn renders_back_to_toml() {
        let config = OrchestratorConfig::default().with_max_buffered(Some(100));
        let text = config.to_toml_string().unwrap();
        assert_eq!(OrchestratorConfig::from_toml_str(&text).unwrap(), config);
    }
}
