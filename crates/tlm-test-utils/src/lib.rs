//! Testing utilities for TLM workspace
//!
//! Shared test helpers, fixtures, and assertions.

#![allow(missing_docs)]

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tlm_config::telemetry::{simulated_device, transport_path};
use tlm_config::{ConfigDelta, MemoryConfigStore, SensorGroup, TransportState};
use tlm_core::{LifecycleState, OrchestratorConfig, SubscriptionHandle, TelemetryOrchestrator};
use tlm_stream::{Endpoint, LoopbackConnector, SecurityTier, TierScript};

pub const GROUP: &str = "grp1";

pub const MEMORY_PATH: &str = "Cisco-IOS-XR-nto-misc-oper:memory-summary/nodes/node/summary";

pub const INTERFACE_PATH: &str =
    "Cisco-IOS-XR-infra-statsd-oper:infra-statistics/interfaces/interface/latest/generic-counters";

pub const WAIT: Duration = Duration::from_secs(5);

pub fn sensor_group(id: &str) -> SensorGroup {
    SensorGroup::new(id).with_path(MEMORY_PATH).with_path(INTERFACE_PATH)
}

/// Telemetry device with sensor group [`GROUP`] and no transport configured
pub fn seeded_device() -> MemoryConfigStore {
    let device = simulated_device();
    device.apply_external(&[sensor_group(GROUP).save_delta()]).unwrap();
    device
}

/// As [`seeded_device`], with the transport already configured
pub fn seeded_device_with_transport(enabled: bool, port: u16) -> MemoryConfigStore {
    let device = seeded_device();
    device
        .apply_external(&[ConfigDelta::replace(
            transport_path(),
            TransportState { enabled, port }.to_node(),
        )])
        .unwrap();
    device
}

/// JSON-encoded telemetry record
pub fn json_record(seq: u64, path: &str) -> Vec<u8> {
    let ts = 1_700_000_000_000_u64 + seq * 1000;
    json!({
        "node_id_str": "router1",
        "subscription_id_str": "anx",
        "encoding_path": path,
        "collection_id": seq,
        "msg_timestamp": ts,
        "data_json": [{ "timestamp": ts, "keys": { "node-name": "0/RP0/CPU0" }, "content": { "seq": seq } }],
    })
    .to_string()
    .into_bytes()
}

/// `count` JSON records on [`MEMORY_PATH`], numbered from `first`
pub fn json_records(first: u64, count: u64) -> Vec<Vec<u8>> {
    (first..first + count).map(|seq| json_record(seq, MEMORY_PATH)).collect()
}

/// Strong tier rejects the handshake, unencrypted tier streams `records`
pub fn downgrading_connector(records: Vec<Vec<u8>>) -> LoopbackConnector {
    LoopbackConnector::new()
        .with_tier(
            SecurityTier::Strong,
            TierScript::reject_handshake("PKIX path building failed"),
        )
        .with_tier(SecurityTier::Unencrypted, TierScript::stream(records))
}

/// Strong tier streams `records`
pub fn secure_connector(records: Vec<Vec<u8>>) -> LoopbackConnector {
    LoopbackConnector::new().with_tier(SecurityTier::Strong, TierScript::stream(records))
}

pub fn orchestrator(device: &MemoryConfigStore, connector: &LoopbackConnector) -> TelemetryOrchestrator {
    orchestrator_with(device, connector, OrchestratorConfig::default())
}

pub fn orchestrator_with(
    device: &MemoryConfigStore,
    connector: &LoopbackConnector,
    config: OrchestratorConfig,
) -> TelemetryOrchestrator {
    TelemetryOrchestrator::new(
        Arc::new(device.clone()),
        Arc::new(connector.clone()),
        Endpoint::new("router1", 830).with_credentials("admin", "admin"),
        config,
    )
    .unwrap()
}

/// Await `future`, failing the test after [`WAIT`]
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
}

pub async fn wait_for(handle: &SubscriptionHandle, state: LifecycleState) {
    within(handle.wait_for_state(|s| s == state)).await.unwrap();
}

/// Poll `condition` until it holds, failing the test after [`WAIT`]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
}
