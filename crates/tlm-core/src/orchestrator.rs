//! Telemetry subscription orchestrator
//!
//! Starting a subscription runs the configuration step in the caller's
//! task; once the device accepted it, a driver task takes over streaming and
//! eventually reverts exactly the changes that step made.

use crate::config::OrchestratorConfig;
use crate::error::SubscriptionError;
use crate::fallback::FallbackPolicy;
use crate::sink::{MeasurementBuffer, MeasurementSink};
use crate::state::{validate_transition, LifecycleState};
use crate::subscription::{Driver, Outcome, Registration, Registry, SubscriptionHandle};
use crate::types::{SubscriptionId, SubscriptionStatus};
use std::fmt;
use std::sync::Arc;
use tlm_config::telemetry::transport_path;
use tlm_config::{ConfigError, ConfigStore, ConfigTransaction, SubscriptionConfig, TransportState};
use tlm_stream::{Endpoint, StreamConnector, SubscribeRequest};
use tokio::sync::{mpsc, watch};

const COMMAND_CAPACITY: usize = 32;

/// Result of the configuration step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Prepared {
    owns_transport_enable: bool,
    port: u16,
}

/// Starts and tracks telemetry subscriptions against one device
pub struct TelemetryOrchestrator {
    store: Arc<dyn ConfigStore>,
    connector: Arc<dyn StreamConnector>,
    endpoint: Endpoint,
    config: OrchestratorConfig,
    registry: Arc<Registry>,
}

impl TelemetryOrchestrator {
    /// Create orchestrator
    ///
    /// `endpoint` names the device; its port is replaced by the transport
    /// port read from the device for each subscription.
    ///
    /// # Errors
    /// [`SubscriptionError::Config`] if `config` fails validation
    pub fn new(
        store: Arc<dyn ConfigStore>,
        connector: Arc<dyn StreamConnector>,
        endpoint: Endpoint,
        config: OrchestratorConfig,
    ) -> Result<Self, SubscriptionError> {
        config.validate()?;
        Ok(Self {
            store,
            connector,
            endpoint,
            config,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Configuration in effect
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Configure the device for `sensor_group` and start streaming into `sink`
    ///
    /// Returns once the configuration commit succeeded and the driver task
    /// was started; streaming proceeds in the background.
    ///
    /// # Errors
    /// [`SubscriptionError::SetupFailed`] if reading or committing the
    /// configuration failed; the device is left unchanged
    pub async fn start_subscription(
        &self,
        sensor_group: &str,
        sink: Arc<dyn MeasurementSink>,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let id = SubscriptionId::generate(&self.config.id_prefix);
        validate_transition(LifecycleState::Idle, LifecycleState::Preparing)?;
        tracing::info!(subscription = %id, group = sensor_group, "preparing subscription");

        let prepared = match self.prepare(&id, sensor_group).await {
            Ok(prepared) => prepared,
            Err(err) => {
                validate_transition(LifecycleState::Preparing, LifecycleState::Closed)?;
                tracing::warn!(
                    subscription = %id,
                    group = sensor_group,
                    error = %err,
                    "subscription setup failed"
                );
                return Err(SubscriptionError::SetupFailed(err));
            }
        };

        let tier = self.config.initial_tier;
        let state = LifecycleState::Subscribing(tier);
        validate_transition(LifecycleState::Preparing, state)?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus {
            state,
            tier,
            records: 0,
            downgraded: false,
            owns_transport_enable: prepared.owns_transport_enable,
            outcome: None,
        });

        self.registry.insert(
            id.clone(),
            Registration {
                sensor_group: sensor_group.to_string(),
                commands: commands_tx.downgrade(),
                status: status_rx.clone(),
            },
        );

        let driver = Driver {
            id: id.clone(),
            store: Arc::clone(&self.store),
            connector: Arc::clone(&self.connector),
            endpoint: self.endpoint.at_port(prepared.port),
            request: SubscribeRequest::new(id.as_str()).with_encoding(self.config.encoding),
            policy: FallbackPolicy::new(self.config.allow_downgrade),
            sink,
            owns_transport_enable: prepared.owns_transport_enable,
            state,
            tier,
            events: events_tx,
            status: status_tx,
            registry: Arc::clone(&self.registry),
            listeners: Vec::new(),
            client: None,
            generation: 0,
            records: 0,
            downgraded: false,
        };
        tracing::info!(subscription = %id, from = %LifecycleState::Preparing, to = %state, "lifecycle transition");
        tokio::spawn(driver.run(commands_rx, events_rx));

        Ok(SubscriptionHandle::new(
            id,
            sensor_group.to_string(),
            commands_tx,
            status_rx,
        ))
    }

    /// Start a subscription into a new [`MeasurementBuffer`] sized by
    /// `max_buffered`
    ///
    /// # Errors
    /// As [`start_subscription`](Self::start_subscription)
    pub async fn start_buffered(
        &self,
        sensor_group: &str,
    ) -> Result<(SubscriptionHandle, Arc<MeasurementBuffer>), SubscriptionError> {
        let buffer = Arc::new(MeasurementBuffer::with_capacity(self.config.max_buffered));
        let handle = self
            .start_subscription(sensor_group, Arc::clone(&buffer) as Arc<dyn MeasurementSink>)
            .await?;
        Ok((handle, buffer))
    }

    async fn prepare(&self, id: &SubscriptionId, sensor_group: &str) -> Result<Prepared, ConfigError> {
        let mut txn = ConfigTransaction::begin(self.store.as_ref()).await?;
        let grpc = txn.read_subtree(&transport_path()).await?;
        let transport = TransportState::from_node_or(&grpc, self.config.default_port)?;

        let owns_transport_enable = !transport.enabled;
        if owns_transport_enable {
            txn.propose(TransportState::enable_delta()).await?;
        }
        let subscription = SubscriptionConfig {
            id: id.to_string(),
            sensor_group: sensor_group.to_string(),
            sample_interval_ms: self.config.sample_interval_ms,
        };
        txn.propose(subscription.create_delta()).await?;

        let receipt = txn.commit().await?;
        tracing::info!(
            subscription = %id,
            commit = ?receipt.id,
            port = transport.port,
            owns_transport_enable,
            "subscription configured"
        );
        Ok(Prepared {
            owns_transport_enable,
            port: transport.port,
        })
    }

    /// Live subscriptions with their sensor group and status
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(SubscriptionId, String, SubscriptionStatus)> {
        self.registry
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().sensor_group.clone(),
                    entry.value().status.borrow().clone(),
                )
            })
            .collect()
    }

    /// Number of live subscriptions
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Close every live subscription
    ///
    /// Returns each subscription's outcome.
    pub async fn shutdown_all(&self) -> Vec<(SubscriptionId, Outcome)> {
        let live: Vec<(SubscriptionId, Registration)> = self
            .registry
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let closes = live.into_iter().map(|(id, registration)| async move {
            let outcome = registration.close().await;
            (id, outcome)
        });
        let outcomes = futures::future::join_all(closes).await;
        tracing::info!(closed = outcomes.len(), "all subscriptions shut down");
        outcomes
    }
}

impl fmt::Debug for TelemetryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryOrchestrator")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .field("active", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlm_config::telemetry::{self, simulated_device};
    use tlm_config::{ConfigDelta, MemoryConfigStore, SensorGroup};
    use tlm_stream::{LoopbackConnector, SecurityTier, TierScript};

    fn device_with_group() -> MemoryConfigStore {
        let device = simulated_device();
        device
            .apply_external(&[SensorGroup::new("grp1").with_path("a").save_delta()])
            .unwrap();
        device
    }

    fn orchestrator(device: &MemoryConfigStore, connector: &LoopbackConnector) -> TelemetryOrchestrator {
        TelemetryOrchestrator::new(
            Arc::new(device.clone()),
            Arc::new(connector.clone()),
            Endpoint::new("router1", 830),
            OrchestratorConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn subscriptions_can_be_started_and_closed_from_spawned_tasks() {
        let device = device_with_group();
        let before = device.running();
        let connector = LoopbackConnector::new()
            .with_tier(SecurityTier::Strong, TierScript::stream(Vec::<Vec<u8>>::new()));
        let orch = Arc::new(orchestrator(&device, &connector));

        let start = tokio::spawn({
            let orch = Arc::clone(&orch);
            async move {
                orch.start_subscription("grp1", Arc::new(MeasurementBuffer::new()))
                    .await
            }
        });
        let handle = start.await.unwrap().unwrap();
        handle
            .wait_for_state(|s| s == LifecycleState::Subscribing(SecurityTier::Strong) || s.is_terminal())
            .await
            .unwrap();

        let close = tokio::spawn(async move { handle.close().await });
        assert_eq!(close.await.unwrap(), Ok(()));
        assert_eq!(device.running(), before);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = TelemetryOrchestrator::new(
            Arc::new(simulated_device()),
            Arc::new(LoopbackConnector::new()),
            Endpoint::new("router1", 830),
            OrchestratorConfig::default().with_sample_interval_ms(0),
        );
        assert!(matches!(result, Err(SubscriptionError::Config(_))));
    }

    #[tokio::test]
    async fn prepare_enables_disabled_transport_once() {
        let device = device_with_group();
        let orch = orchestrator(&device, &LoopbackConnector::new());
        let id = SubscriptionId::from_string("anx-test");

        let prepared = orch.prepare(&id, "grp1").await.unwrap();
        assert!(prepared.owns_transport_enable);
        assert_eq!(prepared.port, 57400);
        assert!(device.get(&transport_path().child("enable")).is_some());
        assert!(device.get(&telemetry::subscription_path("anx-test")).is_some());
        assert_eq!(device.commits().last().unwrap().deltas.len(), 2);
    }

    #[tokio::test]
    async fn prepare_leaves_enabled_transport_alone() {
        let device = device_with_group();
        device.apply_external(&[TransportState::enable_delta()]).unwrap();
        let orch = orchestrator(&device, &LoopbackConnector::new());

        let prepared = orch
            .prepare(&SubscriptionId::from_string("anx-test"), "grp1")
            .await
            .unwrap();
        assert!(!prepared.owns_transport_enable);
        assert_eq!(device.commits().last().unwrap().deltas.len(), 1);
    }

    #[tokio::test]
    async fn stream_targets_device_transport_port() {
        let device = device_with_group();
        device
            .apply_external(&[ConfigDelta::replace(
                transport_path(),
                TransportState { enabled: true, port: 57500 }.to_node(),
            )])
            .unwrap();
        let connector = LoopbackConnector::new()
            .with_tier(SecurityTier::Strong, TierScript::stream([b"{}".to_vec()]));
        let orch = orchestrator(&device, &connector);

        let handle = orch.start_subscription("grp1", Arc::new(MeasurementBuffer::new())).await.unwrap();
        handle
            .wait_for_state(|s| s == LifecycleState::Active)
            .await
            .unwrap();
        assert_eq!(orch.active_count(), 1);
        assert_eq!(connector.requests()[0].1.subscription_id, handle.id().as_str());
        let (tier, endpoint) = connector.connections()[0].clone();
        assert_eq!(tier, SecurityTier::Strong);
        assert_eq!(endpoint.to_string(), "router1:57500");
        assert!(handle.close().await.is_ok());
        assert_eq!(orch.active_count(), 0);
    }
}
