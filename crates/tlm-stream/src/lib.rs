//! Security-tiered telemetry streaming
//!
//! A [`StreamConnector`] opens [`StreamClient`]s at a [`SecurityTier`]; a
//! subscribed client reports records and exactly one [`Termination`] through
//! its [`Delivery`]. [`LoopbackConnector`] is a scripted endpoint used for
//! simulation and tests.

#![warn(unreachable_pub)]

mod client;
mod delivery;
mod endpoint;
mod error;
mod loopback;
mod tier;

pub use client::{StreamClient, StreamConnector, SubscribeRequest};
pub use delivery::{Delivery, Generation, StreamEvent};
pub use endpoint::{Credentials, Endpoint};
pub use error::{StreamError, Termination};
pub use loopback::{LoopbackConnector, ScriptEnd, TierScript};
pub use tier::{Encoding, SecurityTier};
