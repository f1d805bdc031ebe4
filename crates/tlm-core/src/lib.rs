//! TLM Core - Telemetry subscription orchestrator
//!
//! Enables streaming telemetry on a device and keeps the device clean:
//! - Configures the transport and a subscription in one transaction
//! - Streams records at the strongest security tier, downgrading once if the
//!   handshake is rejected
//! - On close, failure or handle drop, reverts exactly the changes it made
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tlm_core::{OrchestratorConfig, TelemetryOrchestrator};
//! use tlm_stream::Endpoint;
//!
//! let orchestrator = TelemetryOrchestrator::new(
//!     Arc::new(device),
//!     Arc::new(connector),
//!     Endpoint::new("router1", 830),
//!     OrchestratorConfig::default(),
//! )?;
//! let (handle, buffer) = orchestrator.start_buffered("grp1").await?;
//! handle.wait_for_state(|s| s == tlm_core::LifecycleState::Active).await?;
//! println!("{:?}", buffer.labels());
//! handle.close().await?;
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod config;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod record;
pub mod sink;
pub mod state;
pub mod subscription;
pub mod types;

// Re-exports for convenience
pub use config::OrchestratorConfig;
pub use error::{OrchestratorConfigError, SubscriptionError};
pub use fallback::{FallbackDecision, FallbackPolicy};
pub use orchestrator::TelemetryOrchestrator;
pub use record::{MeasurementRecord, Payload};
pub use sink::{MeasurementBuffer, MeasurementSink};
pub use state::{allowed_transitions, validate_transition, LifecycleState};
pub use subscription::{Outcome, RecordListener, SubscriptionHandle};
pub use types::{SubscriptionId, SubscriptionStatus};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with TLM Core
    pub use crate::{
        LifecycleState, MeasurementBuffer, MeasurementRecord, MeasurementSink,
        OrchestratorConfig, SubscriptionError, SubscriptionHandle, TelemetryOrchestrator,
    };
}
