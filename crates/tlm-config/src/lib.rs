//! Device configuration store
//!
//! Transactional access to a device's configuration datastores, plus the
//! telemetry model the orchestrator edits.
//!
//! # Core Concepts
//!
//! - [`ConfigPath`]: namespace-qualified address of a subtree, element or list entry
//! - [`ConfigNode`]: configuration element tree
//! - [`ConfigDelta`]: one staged edit (`create`, `merge`, `replace`, `remove`)
//! - [`ConfigStore`] / [`ConfigSession`]: device contract
//! - [`ConfigTransaction`]: scoped read/propose/commit over one session
//! - [`MemoryConfigStore`]: in-memory device used for simulation and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use tlm_config::{telemetry, ConfigTransaction, TransportState};
//!
//! let device = telemetry::simulated_device();
//! let mut txn = ConfigTransaction::begin(&device).await?;
//! let grpc = txn.read_subtree(&telemetry::transport_path()).await?;
//! if !TransportState::from_node(&grpc)?.enabled {
//!     txn.propose(TransportState::enable_delta()).await?;
//! }
//! txn.commit().await?;
//! ```

#![warn(unreachable_pub)]

mod delta;
mod error;
mod groups;
mod memory;
mod node;
mod path;
mod store;

/// Telemetry and transport model
pub mod telemetry;

pub use delta::{ConfigDelta, DeltaError, EditOperation};
pub use error::ConfigError;
pub use groups::SensorGroups;
pub use memory::{CommitRecord, Datastore, MemoryConfigStore, MemoryConfigStoreBuilder, ValidationRule};
pub use node::{ConfigNode, ListKeys};
pub use path::{ConfigPath, PathError, Segment};
pub use store::{CommitId, CommitReceipt, ConfigSession, ConfigStore, ConfigTransaction};
pub use telemetry::{SensorGroup, SubscriptionConfig, TransportState};
