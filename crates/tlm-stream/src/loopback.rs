//! Simulated streaming endpoint
//!
//! [`LoopbackConnector`] plays a fixed script per security tier: refuse the
//! connection, reject the handshake, or stream a list of records at an
//! interval and then end or stay open until closed.

use crate::client::{StreamClient, StreamConnector, SubscribeRequest};
use crate::delivery::Delivery;
use crate::endpoint::Endpoint;
use crate::error::{StreamError, Termination};
use crate::tier::SecurityTier;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How a scripted stream ends after its records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Keep the stream open until the client is closed
    StayOpen,
    /// Terminate with the given reason
    Terminate(Termination),
}

/// Behavior of the endpoint at one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierScript {
    open_failure: Option<Termination>,
    records: Vec<Vec<u8>>,
    interval: Duration,
    end: ScriptEnd,
}

impl TierScript {
    /// Stream `records` then stay open
    #[must_use]
    pub fn stream<I, R>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        Self {
            open_failure: None,
            records: records.into_iter().map(Into::into).collect(),
            interval: Duration::from_millis(1),
            end: ScriptEnd::StayOpen,
        }
    }

    /// Accept the connection, then fail the handshake on subscribe
    #[must_use]
    pub fn reject_handshake(detail: impl Into<String>) -> Self {
        Self::stream(Vec::<Vec<u8>>::new())
            .then_terminate(Termination::HandshakeRejected(detail.into()))
    }

    /// Refuse the connection itself
    #[must_use]
    pub fn fail_open(reason: Termination) -> Self {
        Self {
            open_failure: Some(reason),
            ..Self::stream(Vec::<Vec<u8>>::new())
        }
    }

    /// End with `reason` after the records
    #[must_use]
    pub fn then_terminate(mut self, reason: Termination) -> Self {
        self.end = ScriptEnd::Terminate(reason);
        self
    }

    /// End cleanly after the records
    #[must_use]
    pub fn then_close(self) -> Self {
        self.then_terminate(Termination::Closed)
    }

    /// Delay before each record
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Scripted records
    #[must_use]
    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    max_live: AtomicUsize,
    opened_at: Mutex<HashMap<SecurityTier, usize>>,
    endpoints: Mutex<Vec<(SecurityTier, Endpoint)>>,
    requests: Mutex<Vec<(SecurityTier, SubscribeRequest)>>,
}

impl Counters {
    fn live(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

/// Scripted in-process streaming endpoint
///
/// Cloning yields another handle to the same endpoint and counters.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    scripts: Arc<Mutex<HashMap<SecurityTier, TierScript>>>,
    counters: Arc<Counters>,
}

impl LoopbackConnector {
    /// Endpoint with no tier offered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `tier` with `script`
    #[must_use]
    pub fn with_tier(self, tier: SecurityTier, script: TierScript) -> Self {
        self.set_script(tier, script);
        self
    }

    /// Replace the script for `tier`
    pub fn set_script(&self, tier: SecurityTier, script: TierScript) {
        self.scripts.lock().insert(tier, script);
    }

    /// Clients opened so far, at any tier
    #[must_use]
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Clients opened at `tier`
    #[must_use]
    pub fn opened_at(&self, tier: SecurityTier) -> usize {
        self.counters.opened_at.lock().get(&tier).copied().unwrap_or(0)
    }

    /// Clients closed so far
    #[must_use]
    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Clients currently open
    #[must_use]
    pub fn live(&self) -> usize {
        self.counters.live()
    }

    /// Highest number of clients simultaneously open
    #[must_use]
    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    /// Endpoints connected to, with the tier, in open order
    #[must_use]
    pub fn connections(&self) -> Vec<(SecurityTier, Endpoint)> {
        self.counters.endpoints.lock().clone()
    }

    /// Subscribe requests received, with the tier they arrived on
    #[must_use]
    pub fn requests(&self) -> Vec<(SecurityTier, SubscribeRequest)> {
        self.counters.requests.lock().clone()
    }
}

#[async_trait]
impl StreamConnector for LoopbackConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        tier: SecurityTier,
    ) -> Result<Box<dyn StreamClient>, StreamError> {
        let script = self.scripts.lock().get(&tier).cloned();
        let script = script.ok_or_else(|| StreamError::Open {
            endpoint: endpoint.to_string(),
            tier,
            reason: Termination::Protocol(format!("{tier} transport not offered")),
        })?;
        if let Some(reason) = script.open_failure.clone() {
            return Err(StreamError::Open {
                endpoint: endpoint.to_string(),
                tier,
                reason,
            });
        }

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        *self.counters.opened_at.lock().entry(tier).or_insert(0) += 1;
        self.counters.endpoints.lock().push((tier, endpoint.clone()));
        self.counters
            .max_live
            .fetch_max(self.counters.live(), Ordering::SeqCst);
        tracing::debug!(%endpoint, %tier, "loopback client opened");

        Ok(Box::new(LoopbackClient {
            tier,
            script,
            counters: Arc::clone(&self.counters),
            task: None,
            closed: false,
        }))
    }
}

struct LoopbackClient {
    tier: SecurityTier,
    script: TierScript,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl LoopbackClient {
    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamClient for LoopbackClient {
    fn tier(&self) -> SecurityTier {
        self.tier
    }

    async fn subscribe(
        &mut self,
        request: &SubscribeRequest,
        delivery: Delivery,
    ) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::ClientClosed);
        }
        if self.task.is_some() {
            return Err(StreamError::Subscribe(Termination::Protocol(
                "already subscribed".to_string(),
            )));
        }
        self.counters.requests.lock().push((self.tier, request.clone()));
        self.task = Some(tokio::spawn(play(self.script.clone(), delivery)));
        Ok(())
    }

    async fn close(&mut self) {
        self.shutdown();
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn play(script: TierScript, delivery: Delivery) {
    for record in script.records {
        tokio::time::sleep(script.interval).await;
        if !delivery.record(record) {
            return;
        }
    }
    match script.end {
        ScriptEnd::Terminate(reason) => delivery.terminate(reason),
        ScriptEnd::StayOpen => {
            std::future::pending::<()>().await;
            drop(delivery);
        }
    }
}
