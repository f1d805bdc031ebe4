//! Stream client contract

use crate::delivery::Delivery;
use crate::endpoint::Endpoint;
use crate::error::StreamError;
use crate::tier::{Encoding, SecurityTier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Subscription request sent on an open stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Device-side subscription identifier
    pub subscription_id: String,
    /// Record encoding
    #[serde(default)]
    pub encoding: Encoding,
}

impl SubscribeRequest {
    /// Request for `subscription_id` in the default encoding
    #[inline]
    #[must_use]
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            encoding: Encoding::default(),
        }
    }

    /// Set the encoding
    #[inline]
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// A connected stream client at one security tier
#[async_trait]
pub trait StreamClient: Send {
    /// Tier this client was opened at
    fn tier(&self) -> SecurityTier;

    /// Start streaming; records and the termination arrive via `delivery`
    ///
    /// Returns once the request is issued.
    ///
    /// # Errors
    /// [`StreamError`] if the request cannot be issued
    async fn subscribe(
        &mut self,
        request: &SubscribeRequest,
        delivery: Delivery,
    ) -> Result<(), StreamError>;

    /// Stop streaming and release the connection
    ///
    /// Idempotent and safe before `subscribe`.
    async fn close(&mut self);
}

/// Opens stream clients
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Connect to `endpoint` at `tier`
    ///
    /// # Errors
    /// [`StreamError::Open`] with the classified cause
    async fn open(
        &self,
        endpoint: &Endpoint,
        tier: SecurityTier,
    ) -> Result<Box<dyn StreamClient>, StreamError>;
}
