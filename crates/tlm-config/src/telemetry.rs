//! Telemetry device model
//!
//! Paths, edits and validation rules for the two configuration subtrees the
//! orchestrator touches: the gRPC transport settings and the model-driven
//! telemetry subtree (sensor groups and subscriptions).

use crate::delta::ConfigDelta;
use crate::error::ConfigError;
use crate::memory::{Datastore, MemoryConfigStore, ValidationRule};
use crate::node::{ConfigNode, ListKeys};
use crate::path::ConfigPath;
use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Model-driven telemetry configuration namespace
pub const NS_TELEMETRY: &str = "http://cisco.com/ns/yang/Cisco-IOS-XR-telemetry-model-driven-cfg";

/// Manageability (gRPC server) configuration namespace
pub const NS_EMS: &str = "http://cisco.com/ns/yang/Cisco-IOS-XR-man-ems-cfg";

/// gRPC port used when the device does not configure one
pub const DEFAULT_TRANSPORT_PORT: u16 = 57400;

/// `{ems}grpc`
#[must_use]
pub fn transport_path() -> ConfigPath {
    ConfigPath::subtree(NS_EMS, "grpc")
}

/// `{telemetry}telemetry-model-driven`
#[must_use]
pub fn telemetry_path() -> ConfigPath {
    ConfigPath::subtree(NS_TELEMETRY, "telemetry-model-driven")
}

/// Container of all sensor groups
#[must_use]
pub fn sensor_groups_path() -> ConfigPath {
    telemetry_path().child("sensor-groups")
}

/// One sensor group entry
#[must_use]
pub fn sensor_group_path(id: &str) -> ConfigPath {
    sensor_groups_path().entry("sensor-group", "sensor-group-identifier", id)
}

/// Container of all subscriptions
#[must_use]
pub fn subscriptions_path() -> ConfigPath {
    telemetry_path().child("subscriptions")
}

/// One subscription entry
#[must_use]
pub fn subscription_path(id: &str) -> ConfigPath {
    subscriptions_path().entry("subscription", "subscription-identifier", id)
}

/// List keys of the telemetry model
#[must_use]
pub fn list_keys() -> ListKeys {
    ListKeys::new()
        .with_list("sensor-group", "sensor-group-identifier")
        .with_list("sensor-path", "telemetry-sensor-path")
        .with_list("subscription", "subscription-identifier")
        .with_list("sensor-profile", "sensorgroupid")
}

/// State of the device's streaming transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportState {
    /// Whether the gRPC server is enabled
    pub enabled: bool,
    /// gRPC listening port
    pub port: u16,
}

impl TransportState {
    /// Interpret a `grpc` subtree read from the running datastore
    ///
    /// A missing port leaf means [`DEFAULT_TRANSPORT_PORT`].
    ///
    /// # Errors
    /// [`ConfigError::Read`] if the port is not in 1..=65535
    pub fn from_node(node: &ConfigNode) -> Result<Self, ConfigError> {
        Self::from_node_or(node, DEFAULT_TRANSPORT_PORT)
    }

    /// As [`from_node`](Self::from_node), with `default_port` for a missing port leaf
    ///
    /// # Errors
    /// [`ConfigError::Read`] if the port is not in 1..=65535
    pub fn from_node_or(node: &ConfigNode, default_port: u16) -> Result<Self, ConfigError> {
        let port = match node.text_of("port") {
            None => default_port,
            Some(text) => parse_port(text)
                .ok_or_else(|| ConfigError::read(transport_path(), format!("invalid port '{text}'")))?,
        };
        Ok(Self {
            enabled: node.has_child("enable"),
            port,
        })
    }

    /// `grpc` subtree describing this state
    #[must_use]
    pub fn to_node(&self) -> ConfigNode {
        let node = ConfigNode::qualified(NS_EMS, "grpc").with_text_child("port", self.port.to_string());
        if self.enabled {
            node.with_empty_child("enable")
        } else {
            node
        }
    }

    /// Edit that enables the transport
    #[must_use]
    pub fn enable_delta() -> ConfigDelta {
        ConfigDelta::merge(
            transport_path(),
            ConfigNode::new("grpc").with_empty_child("enable"),
        )
    }

    /// Edit that disables the transport
    #[must_use]
    pub fn disable_delta() -> ConfigDelta {
        ConfigDelta::remove(transport_path().child("enable"))
    }
}

fn parse_port(text: &str) -> Option<u16> {
    text.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

/// Device-side subscription entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Subscription identifier
    pub id: String,
    /// Referenced sensor group
    pub sensor_group: String,
    /// Sampling interval in milliseconds
    pub sample_interval_ms: u64,
}

impl SubscriptionConfig {
    /// `subscription` entry element
    #[must_use]
    pub fn to_node(&self) -> ConfigNode {
        let profile = ConfigNode::new("sensor-profile")
            .with_text_child("sensorgroupid", self.sensor_group.clone())
            .with_text_child("sample-interval", self.sample_interval_ms.to_string());
        ConfigNode::new("subscription")
            .with_text_child("subscription-identifier", self.id.clone())
            .with_child(ConfigNode::new("sensor-profiles").with_child(profile))
    }

    /// Edit that creates the subscription; fails at commit if the id exists
    #[must_use]
    pub fn create_delta(&self) -> ConfigDelta {
        ConfigDelta::create(subscription_path(&self.id), self.to_node())
    }

    /// Edit that removes subscription `id`
    #[must_use]
    pub fn remove_delta(id: &str) -> ConfigDelta {
        ConfigDelta::remove(subscription_path(id))
    }
}

/// Named set of sensor paths
///
/// Paths have set semantics: adding a duplicate is a no-op. Insertion order
/// is kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorGroup {
    id: String,
    paths: IndexSet<String>,
}

impl SensorGroup {
    /// Empty group
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            paths: IndexSet::new(),
        }
    }

    /// Add a path, returning new group
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.insert(path.into());
        self
    }

    /// Add a path; returns false if it was already present
    pub fn add_path(&mut self, path: impl Into<String>) -> bool {
        self.paths.insert(path.into())
    }

    /// Remove a path; returns false if it was absent
    pub fn remove_path(&mut self, path: &str) -> bool {
        self.paths.shift_remove(path)
    }

    /// Group identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sensor paths in insertion order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Whether the group contains `path`
    #[inline]
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Number of distinct paths
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the group has no paths
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Interpret a `sensor-group` entry
    ///
    /// Returns `None` if the entry carries no identifier.
    #[must_use]
    pub fn from_node(node: &ConfigNode) -> Option<Self> {
        let id = node.text_of("sensor-group-identifier")?;
        let paths = node
            .find("sensor-paths/sensor-path/telemetry-sensor-path")
            .into_iter()
            .filter_map(ConfigNode::text)
            .map(str::to_string)
            .collect();
        Some(Self {
            id: id.to_string(),
            paths,
        })
    }

    /// `sensor-group` entry element
    #[must_use]
    pub fn to_node(&self) -> ConfigNode {
        let mut sensor_paths = ConfigNode::new("sensor-paths");
        for path in &self.paths {
            sensor_paths.push_child(
                ConfigNode::new("sensor-path").with_text_child("telemetry-sensor-path", path.clone()),
            );
        }
        ConfigNode::new("sensor-group")
            .with_text_child("sensor-group-identifier", self.id.clone())
            .with_child(sensor_paths)
    }

    /// Edit that stores exactly this group's path set
    #[must_use]
    pub fn save_delta(&self) -> ConfigDelta {
        ConfigDelta::replace(sensor_group_path(&self.id), self.to_node())
    }

    /// Edit that deletes group `id`
    #[must_use]
    pub fn delete_delta(id: &str) -> ConfigDelta {
        ConfigDelta::remove(sensor_group_path(id))
    }
}

/// Validation rules a telemetry-capable device applies at commit
///
/// - gRPC port within 1..=65535
/// - sensor group and subscription identifiers well formed
/// - sample intervals numeric
/// - subscription profiles reference configured sensor groups
#[must_use]
pub fn device_rules() -> Vec<ValidationRule> {
    let identifier = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,63}$")
        .unwrap_or_else(|_| unreachable!("identifier pattern is a valid regex"));

    let port_rule: ValidationRule = Arc::new(|ds: &Datastore| {
        match ds.get(&transport_path().child("port")).and_then(ConfigNode::text) {
            Some(text) if parse_port(text).is_none() => {
                Err(format!("'grpc' port '{text}' is out of range 1-65535"))
            }
            _ => Ok(()),
        }
    });

    let identifier_rule: ValidationRule = Arc::new(move |ds: &Datastore| {
        let Some(root) = ds.get(&telemetry_path()) else {
            return Ok(());
        };
        let groups = root.find("sensor-groups/sensor-group/sensor-group-identifier");
        let subs = root.find("subscriptions/subscription/subscription-identifier");
        for leaf in groups.into_iter().chain(subs) {
            let value = leaf.text().unwrap_or_default();
            if !identifier.is_match(value) {
                return Err(format!("malformed {} '{value}'", leaf.name()));
            }
        }
        Ok(())
    });

    let profile_rule: ValidationRule = Arc::new(|ds: &Datastore| {
        let Some(root) = ds.get(&telemetry_path()) else {
            return Ok(());
        };
        let groups: Vec<&str> = root
            .find("sensor-groups/sensor-group/sensor-group-identifier")
            .into_iter()
            .filter_map(ConfigNode::text)
            .collect();
        for profile in root.find("subscriptions/subscription/sensor-profiles/sensor-profile") {
            let group = profile.text_of("sensorgroupid").unwrap_or_default();
            if !groups.contains(&group) {
                return Err(format!("sensor group '{group}' is not configured"));
            }
            let interval = profile.text_of("sample-interval").unwrap_or("0");
            if interval.parse::<u64>().is_err() {
                return Err(format!("invalid sample-interval '{interval}'"));
            }
        }
        Ok(())
    });

    vec![port_rule, identifier_rule, profile_rule]
}

/// Simulated telemetry-capable device
///
/// Empty running datastore, telemetry list keys and [`device_rules`].
#[must_use]
pub fn simulated_device() -> MemoryConfigStore {
    device_rules()
        .into_iter()
        .fold(MemoryConfigStore::builder().list_keys(list_keys()), |b, rule| b.rule(rule))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConfigTransaction;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn transport_state_reads_enable_and_port() {
        let node = ConfigNode::qualified(NS_EMS, "grpc")
            .with_text_child("port", "57777")
            .with_empty_child("enable");
        let state = TransportState::from_node(&node).unwrap();
        assert_eq!(state, TransportState { enabled: true, port: 57777 });
    }

    #[test]
    fn transport_state_defaults_port() {
        let state = TransportState::from_node(&ConfigNode::qualified(NS_EMS, "grpc")).unwrap();
        assert_eq!(
            state,
            TransportState {
                enabled: false,
                port: DEFAULT_TRANSPORT_PORT
            }
        );
    }

    #[test]
    fn transport_state_rejects_bad_port() {
        for bad in ["0", "65536", "abc"] {
            let node = ConfigNode::qualified(NS_EMS, "grpc").with_text_child("port", bad);
            assert!(matches!(
                TransportState::from_node(&node),
                Err(ConfigError::Read { .. })
            ));
        }
    }

    #[test]
    fn sensor_group_node_round_trip() {
        let group = SensorGroup::new("grp1")
            .with_path("Cisco-IOS-XR-infra-statsd-oper:infra-statistics")
            .with_path("Cisco-IOS-XR-nto-misc-oper:memory-summary");
        let parsed = SensorGroup::from_node(&group.to_node()).unwrap();
        assert_eq!(parsed, group);
    }

    #[test]
    fn subscription_node_layout() {
        let sub = SubscriptionConfig {
            id: "anx-1".into(),
            sensor_group: "grp1".into(),
            sample_interval_ms: 15000,
        };
        let node = sub.to_node();
        assert_eq!(node.text_of("subscription-identifier"), Some("anx-1"));
        let profile = node.find("sensor-profiles/sensor-profile")[0];
        assert_eq!(profile.text_of("sensorgroupid"), Some("grp1"));
        assert_eq!(profile.text_of("sample-interval"), Some("15000"));
        assert!(sub.create_delta().validate().is_ok());
    }

    #[tokio::test]
    async fn device_rejects_out_of_range_port() {
        let device = simulated_device();
        let mut txn = ConfigTransaction::begin(&device).await.unwrap();
        txn.propose(ConfigDelta::merge(
            transport_path(),
            ConfigNode::new("grpc").with_text_child("port", "70000"),
        ))
        .await
        .unwrap();
        let err = txn.commit().await.unwrap_err();
        assert!(err.detail().contains("out of range"));
    }

    #[tokio::test]
    async fn device_rejects_malformed_group_identifier() {
        let device = simulated_device();
        let mut txn = ConfigTransaction::begin(&device).await.unwrap();
        txn.propose(SensorGroup::new("bad id").save_delta()).await.unwrap();
        let err = txn.commit().await.unwrap_err();
        assert!(err.detail().contains("malformed sensor-group-identifier"));
    }

    #[tokio::test]
    async fn device_rejects_subscription_to_unknown_group() {
        let device = simulated_device();
        let sub = SubscriptionConfig {
            id: "anx-1".into(),
            sensor_group: "missing".into(),
            sample_interval_ms: 1000,
        };
        let mut txn = ConfigTransaction::begin(&device).await.unwrap();
        txn.propose(sub.create_delta()).await.unwrap();
        let err = txn.commit().await.unwrap_err();
        assert!(err.detail().contains("not configured"));
    }

    #[tokio::test]
    async fn enable_then_disable_restores_transport() {
        let device = simulated_device();
        device
            .apply_external(&[ConfigDelta::replace(
                transport_path(),
                TransportState { enabled: false, port: 57400 }.to_node(),
            )])
            .unwrap();
        let before = device.running();

        device.apply_external(&[TransportState::enable_delta()]).unwrap();
        assert!(device.get(&transport_path().child("enable")).is_some());

        device.apply_external(&[TransportState::disable_delta()]).unwrap();
        assert_eq!(device.running(), before);
    }

    proptest! {
        #[test]
        fn sensor_paths_have_set_semantics(paths in proptest::collection::vec("[a-z]{1,3}", 0..20)) {
            let mut group = SensorGroup::new("g");
            for p in &paths {
                group.add_path(p.clone());
            }
            let distinct: std::collections::HashSet<_> = paths.iter().collect();
            prop_assert_eq!(group.len(), distinct.len());
            for p in &paths {
                prop_assert!(group.contains(p));
            }
        }
    }
}
