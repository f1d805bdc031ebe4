//! Running subscriptions
//!
//! Each subscription is driven by one task that exclusively owns its
//! lifecycle state, stream client and sink. Stream events and control
//! requests reach it over channels, so every state change happens on that
//! task, and only that task tears down.

use crate::error::SubscriptionError;
use crate::fallback::{FallbackDecision, FallbackPolicy};
use crate::record::MeasurementRecord;
use crate::sink::MeasurementSink;
use crate::state::{validate_transition, LifecycleState};
use crate::types::{SubscriptionId, SubscriptionStatus};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tlm_config::{ConfigError, ConfigStore, ConfigTransaction, SubscriptionConfig, TransportState};
use tlm_stream::{
    Delivery, Endpoint, Generation, SecurityTier, StreamClient, StreamConnector, StreamEvent,
    SubscribeRequest, Termination,
};
use tokio::sync::{mpsc, oneshot, watch};

/// Callback invoked for every record after it reached the sink
pub type RecordListener = Arc<dyn Fn(&MeasurementRecord) + Send + Sync>;

/// Outcome recorded when a subscription reaches `Closed`
pub type Outcome = Result<(), SubscriptionError>;

pub(crate) enum Command {
    Close { reply: oneshot::Sender<Outcome> },
    OnRecord(RecordListener),
}

pub(crate) type Registry = DashMap<SubscriptionId, Registration>;

/// Registry entry; holds no strong sender so dropping the handle still
/// tears the subscription down
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) sensor_group: String,
    pub(crate) commands: mpsc::WeakSender<Command>,
    pub(crate) status: watch::Receiver<SubscriptionStatus>,
}

impl Registration {
    pub(crate) async fn close(&self) -> Outcome {
        request_close(self.commands.upgrade(), &self.status).await
    }
}

async fn request_close(
    commands: Option<mpsc::Sender<Command>>,
    status: &watch::Receiver<SubscriptionStatus>,
) -> Outcome {
    if let Some(commands) = commands {
        let (reply, rx) = oneshot::channel();
        if commands.send(Command::Close { reply }).await.is_ok() {
            if let Ok(outcome) = rx.await {
                return outcome;
            }
        }
    }
    wait_for_outcome(status.clone()).await
}

async fn wait_for_outcome(mut status: watch::Receiver<SubscriptionStatus>) -> Outcome {
    match status.wait_for(|s| s.outcome.is_some()).await {
        Ok(snapshot) => snapshot
            .outcome
            .clone()
            .unwrap_or(Err(SubscriptionError::DriverStopped)),
        Err(_) => Err(SubscriptionError::DriverStopped),
    }
}

/// Control handle of a running subscription
///
/// Dropping the handle tears the subscription down.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    sensor_group: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SubscriptionStatus>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        sensor_group: String,
        commands: mpsc::Sender<Command>,
        status: watch::Receiver<SubscriptionStatus>,
    ) -> Self {
        Self {
            id,
            sensor_group,
            commands,
            status,
        }
    }

    /// Subscription identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Sensor group being streamed
    #[inline]
    #[must_use]
    pub fn sensor_group(&self) -> &str {
        &self.sensor_group
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    /// Wait until the lifecycle state satisfies `predicate`
    ///
    /// # Errors
    /// [`SubscriptionError::DriverStopped`] if the subscription ended in a
    /// state that does not satisfy `predicate`
    pub async fn wait_for_state<P>(&self, mut predicate: P) -> Result<LifecycleState, SubscriptionError>
    where
        P: FnMut(LifecycleState) -> bool,
    {
        let mut status = self.status.clone();
        let result = status.wait_for(|s| predicate(s.state)).await;
        result.map(|s| s.state).map_err(|_| SubscriptionError::DriverStopped)
    }

    /// Register a listener for subsequent records
    ///
    /// Returns false if the subscription already ended.
    pub async fn on_record<F>(&self, listener: F) -> bool
    where
        F: Fn(&MeasurementRecord) + Send + Sync + 'static,
    {
        self.commands
            .send(Command::OnRecord(Arc::new(listener)))
            .await
            .is_ok()
    }

    /// Tear the subscription down and return its outcome
    ///
    /// Safe from any state; once closed, returns the recorded outcome.
    ///
    /// # Errors
    /// The terminal error of the subscription, see [`SubscriptionError`]
    pub async fn close(&self) -> Outcome {
        request_close(Some(self.commands.clone()), &self.status).await
    }

    /// Wait for the subscription to end on its own and return its outcome
    ///
    /// # Errors
    /// The terminal error of the subscription
    pub async fn closed(&self) -> Outcome {
        wait_for_outcome(self.status.clone()).await
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("sensor_group", &self.sensor_group)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

enum Exit {
    Requested(Option<oneshot::Sender<Outcome>>),
    Failed(SubscriptionError),
}

/// Single owner of one subscription's lifecycle
pub(crate) struct Driver {
    pub(crate) id: SubscriptionId,
    pub(crate) store: Arc<dyn ConfigStore>,
    pub(crate) connector: Arc<dyn StreamConnector>,
    pub(crate) endpoint: Endpoint,
    pub(crate) request: SubscribeRequest,
    pub(crate) policy: FallbackPolicy,
    pub(crate) sink: Arc<dyn MeasurementSink>,
    pub(crate) owns_transport_enable: bool,
    pub(crate) state: LifecycleState,
    pub(crate) tier: SecurityTier,
    pub(crate) events: mpsc::UnboundedSender<StreamEvent>,
    pub(crate) status: watch::Sender<SubscriptionStatus>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) listeners: Vec<RecordListener>,
    pub(crate) client: Option<Box<dyn StreamClient>>,
    pub(crate) generation: Generation,
    pub(crate) records: u64,
    pub(crate) downgraded: bool,
}

impl Driver {
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<StreamEvent>,
    ) {
        let exit = match self.establish().await {
            Ok(()) => self.pump(&mut commands, &mut events).await,
            Err(err) => Exit::Failed(err),
        };

        let (reply, cause) = match exit {
            Exit::Requested(reply) => (reply, None),
            Exit::Failed(err) => (None, Some(err)),
        };
        let outcome = self.teardown(cause).await;
        self.report(&outcome);
        self.registry.remove(&self.id);

        commands.close();
        self.status.send_modify(|s| s.outcome = Some(outcome.clone()));
        if let Some(reply) = reply {
            let _ = reply.send(outcome.clone());
        }
        while let Ok(command) = commands.try_recv() {
            if let Command::Close { reply } = command {
                let _ = reply.send(outcome.clone());
            }
        }
    }

    async fn pump(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
        events: &mut mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Exit {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close { reply }) => return Exit::Requested(Some(reply)),
                    Some(Command::OnRecord(listener)) => self.listeners.push(listener),
                    None => {
                        tracing::debug!(subscription = %self.id, "handle dropped");
                        return Exit::Requested(None);
                    }
                },
                Some(event) = events.recv() => {
                    if event.generation() != self.generation {
                        tracing::debug!(
                            subscription = %self.id,
                            generation = event.generation(),
                            "discarding event from superseded client"
                        );
                        continue;
                    }
                    match event {
                        StreamEvent::Record { payload, .. } => {
                            if let Err(err) = self.deliver(payload) {
                                return Exit::Failed(err);
                            }
                        }
                        StreamEvent::Terminated { reason, .. } => {
                            tracing::info!(subscription = %self.id, tier = %self.tier, %reason, "stream terminated by peer");
                            if let Err(err) = self.recover(reason).await {
                                return Exit::Failed(err);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn establish(&mut self) -> Result<(), SubscriptionError> {
        match self.open_and_subscribe(self.tier).await {
            Ok(()) => Ok(()),
            Err(reason) => self.recover(reason).await,
        }
    }

    /// Ok once a replacement client is streaming
    async fn recover(&mut self, mut reason: Termination) -> Result<(), SubscriptionError> {
        loop {
            match self
                .policy
                .decide(&reason, self.tier, self.downgraded, self.records)
            {
                FallbackDecision::Surface => {
                    return Err(SubscriptionError::Stream {
                        tier: self.tier,
                        reason,
                    });
                }
                FallbackDecision::Downgrade(next) => {
                    tracing::warn!(
                        subscription = %self.id,
                        from = %self.tier,
                        to = %next,
                        %reason,
                        "handshake rejected, retrying with lower security"
                    );
                    self.close_client().await;
                    self.downgraded = true;
                    self.tier = next;
                    self.advance(LifecycleState::Subscribing(next))?;
                    match self.open_and_subscribe(next).await {
                        Ok(()) => return Ok(()),
                        Err(again) => reason = again,
                    }
                }
            }
        }
    }

    async fn open_and_subscribe(&mut self, tier: SecurityTier) -> Result<(), Termination> {
        self.generation += 1;
        let mut client = self
            .connector
            .open(&self.endpoint, tier)
            .await
            .map_err(|err| err.termination())?;
        let delivery = Delivery::new(self.generation, self.events.clone());
        let subscribed = client.subscribe(&self.request, delivery).await;
        self.client = Some(client);
        subscribed.map_err(|err| err.termination())?;
        tracing::info!(
            subscription = %self.id,
            endpoint = %self.endpoint,
            %tier,
            generation = self.generation,
            "stream subscribed"
        );
        Ok(())
    }

    fn deliver(&mut self, payload: Vec<u8>) -> Result<(), SubscriptionError> {
        self.records += 1;
        let record = MeasurementRecord::decode(self.records, self.tier, self.request.encoding, payload);
        if matches!(self.state, LifecycleState::Subscribing(_)) {
            self.advance(LifecycleState::Active)?;
        }
        tracing::debug!(
            subscription = %self.id,
            seq = record.seq,
            path = record.encoding_path.as_deref().unwrap_or_default(),
            "record received"
        );

        self.sink.append(record.clone());
        if record.seq == 1 {
            self.sink.select(&record);
        }
        for listener in &self.listeners {
            listener(&record);
        }
        let records = self.records;
        self.status.send_modify(|s| s.records = records);
        Ok(())
    }

    async fn close_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.close().await;
            tracing::debug!(subscription = %self.id, tier = %client.tier(), "stream client closed");
        }
    }

    async fn teardown(&mut self, cause: Option<SubscriptionError>) -> Outcome {
        self.force(LifecycleState::TearingDown);
        self.close_client().await;
        let reverted = self.revert_configuration().await;
        self.force(LifecycleState::Closed);

        match (reverted, cause) {
            (Ok(()), None) => Ok(()),
            (Ok(()), Some(cause)) => Err(cause),
            (Err(source), cause) => Err(SubscriptionError::TeardownFailed {
                source,
                cause: cause.map(Box::new),
            }),
        }
    }

    async fn revert_configuration(&mut self) -> Result<(), ConfigError> {
        let mut txn = ConfigTransaction::begin(self.store.as_ref()).await?;
        txn.propose(SubscriptionConfig::remove_delta(self.id.as_str()))
            .await?;
        if self.owns_transport_enable {
            txn.propose(TransportState::disable_delta()).await?;
        }
        let receipt = txn.commit().await?;
        tracing::info!(
            subscription = %self.id,
            edits = receipt.applied.len(),
            disabled_transport = self.owns_transport_enable,
            "subscription configuration reverted"
        );
        Ok(())
    }

    fn report(&self, outcome: &Outcome) {
        match outcome {
            Ok(()) => tracing::info!(
                subscription = %self.id,
                records = self.records,
                "subscription closed"
            ),
            Err(err) if err.leaves_residual_config() => tracing::error!(
                subscription = %self.id,
                error = %err,
                "subscription teardown failed, device may retain configuration"
            ),
            Err(err) => tracing::warn!(
                subscription = %self.id,
                records = self.records,
                error = %err,
                "subscription failed"
            ),
        }
    }

    fn advance(&mut self, to: LifecycleState) -> Result<(), SubscriptionError> {
        validate_transition(self.state, to)?;
        self.set_state(to);
        Ok(())
    }

    fn force(&mut self, to: LifecycleState) {
        if let Err(err) = self.advance(to) {
            tracing::error!(subscription = %self.id, error = %err, "forcing lifecycle state");
            self.set_state(to);
        }
    }

    fn set_state(&mut self, to: LifecycleState) {
        tracing::info!(subscription = %self.id, from = %self.state, %to, "lifecycle transition");
        self.state = to;
        let (tier, downgraded) = (self.tier, self.downgraded);
        self.status.send_modify(|s| {
            s.state = to;
            s.tier = tier;
            s.downgraded = downgraded;
        });
    }
}
