//! Ordered record delivery from a stream client to its consumer
//!
//! A client reports through a [`Delivery`]: any number of records followed by
//! exactly one termination. Events are tagged with the generation of the
//! client that produced them so a consumer can discard output from a client
//! it has already replaced.

use crate::error::Termination;
use tokio::sync::mpsc;

/// Identifies one stream client within a subscription
pub type Generation = u64;

/// Event produced by a stream client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Serialized record, in arrival order
    Record {
        /// Producing client
        generation: Generation,
        /// Record bytes
        payload: Vec<u8>,
    },
    /// Stream ended; last event of its generation
    Terminated {
        /// Producing client
        generation: Generation,
        /// Why it ended
        reason: Termination,
    },
}

impl StreamEvent {
    /// Producing client
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        match self {
            Self::Record { generation, .. } | Self::Terminated { generation, .. } => *generation,
        }
    }
}

/// Sending half handed to a stream client on subscribe
///
/// `terminate` consumes the handle, so at most one termination is reported.
/// Dropping the handle without terminating reports [`Termination::Closed`].
#[derive(Debug)]
pub struct Delivery {
    generation: Generation,
    tx: mpsc::UnboundedSender<StreamEvent>,
    terminated: bool,
}

impl Delivery {
    /// Delivery for client `generation` feeding `tx`
    #[must_use]
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            generation,
            tx,
            terminated: false,
        }
    }

    /// Channel pair with a delivery for generation 0
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(0, tx), rx)
    }

    /// Client generation
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Deliver one record; returns false once the consumer is gone
    pub fn record(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.tx
            .send(StreamEvent::Record {
                generation: self.generation,
                payload: payload.into(),
            })
            .is_ok()
    }

    /// Report the end of the stream
    pub fn terminate(mut self, reason: Termination) {
        self.send_termination(reason);
    }

    /// Whether the consumer has gone away
    #[inline]
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    fn send_termination(&mut self, reason: Termination) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        let _ = self.tx.send(StreamEvent::Terminated {
            generation: self.generation,
            reason,
        });
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.send_termination(Termination::Closed);
    }
}
