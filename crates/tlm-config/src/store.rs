//! Transactional configuration store contract
//!
//! A [`ConfigStore`] hands out [`ConfigSession`]s against a device. Callers
//! use sessions through [`ConfigTransaction`], which scopes one session to
//! one read/propose/commit sequence and closes it on every exit path.

use crate::delta::ConfigDelta;
use crate::error::ConfigError;
use crate::node::ConfigNode;
use crate::path::ConfigPath;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the device assigns to a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(pub u64);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device configuration store
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Open a configuration session
    ///
    /// # Errors
    /// [`ConfigError::Session`] if the device cannot be reached
    async fn open_session(&self) -> Result<Box<dyn ConfigSession>, ConfigError>;
}

/// One open session against the device
///
/// Edits go to the candidate datastore and become visible in the running
/// datastore only after [`commit`](Self::commit).
#[async_trait]
pub trait ConfigSession: Send {
    /// Read a subtree of the running datastore
    ///
    /// Returns `None` when the subtree does not exist.
    async fn read_running(&mut self, path: &ConfigPath)
        -> Result<Option<ConfigNode>, ConfigError>;

    /// Stage an edit against the candidate datastore
    async fn edit_candidate(&mut self, delta: &ConfigDelta) -> Result<(), ConfigError>;

    /// Atomically apply every staged edit
    ///
    /// On error nothing is applied and the staged edits are dropped.
    async fn commit(&mut self) -> Result<CommitId, ConfigError>;

    /// Release the session, discarding uncommitted edits
    ///
    /// Must be idempotent.
    fn close(&mut self);
}

/// Outcome of a committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Device commit id; `None` when nothing was staged
    pub id: Option<CommitId>,
    /// Edits that were applied
    pub applied: Vec<ConfigDelta>,
}

/// Scoped configuration transaction
///
/// Owns exactly one session for its lifetime. Dropping the transaction
/// without committing discards the staged edits and closes the session.
pub struct ConfigTransaction {
    session: Box<dyn ConfigSession>,
    staged: Vec<ConfigDelta>,
}

impl ConfigTransaction {
    /// Open a session and start a transaction
    ///
    /// # Errors
    /// Propagates the store's session error
    pub async fn begin(store: &dyn ConfigStore) -> Result<Self, ConfigError> {
        let session = store.open_session().await?;
        Ok(Self {
            session,
            staged: Vec::new(),
        })
    }

    /// Read a subtree of the running datastore
    ///
    /// An absent subtree reads as an empty element named after the path's
    /// last segment.
    ///
    /// # Errors
    /// [`ConfigError::Read`] when the device rejects the read
    pub async fn read_subtree(&mut self, path: &ConfigPath) -> Result<ConfigNode, ConfigError> {
        let node = self.session.read_running(path).await?;
        Ok(node.unwrap_or_else(|| {
            if path.is_subtree_root() {
                ConfigNode::qualified(path.namespace(), path.root_element())
            } else {
                ConfigNode::new(path.last().name())
            }
        }))
    }

    /// Stage an edit; edits accumulate until commit
    ///
    /// # Errors
    /// - [`ConfigError::InvalidEdit`] if the delta is malformed
    /// - the session's error if the device refuses the edit
    pub async fn propose(&mut self, delta: ConfigDelta) -> Result<(), ConfigError> {
        delta.validate()?;
        self.session.edit_candidate(&delta).await?;
        tracing::debug!(edit = %delta, "staged configuration edit");
        self.staged.push(delta);
        Ok(())
    }

    /// Edits staged so far
    #[inline]
    #[must_use]
    pub fn staged(&self) -> &[ConfigDelta] {
        &self.staged
    }

    /// Commit the staged edits and close the session
    ///
    /// A transaction with nothing staged closes without a device commit.
    ///
    /// # Errors
    /// [`ConfigError::Commit`] with the device's rejection detail
    pub async fn commit(mut self) -> Result<CommitReceipt, ConfigError> {
        let applied = std::mem::take(&mut self.staged);
        if applied.is_empty() {
            return Ok(CommitReceipt { id: None, applied });
        }
        let id = self.session.commit().await?;
        tracing::info!(commit = %id, edits = applied.len(), "configuration committed");
        Ok(CommitReceipt {
            id: Some(id),
            applied,
        })
    }
}

impl fmt::Debug for ConfigTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigTransaction")
            .field("staged", &self.staged)
            .finish_non_exhaustive()
    }
}

impl Drop for ConfigTransaction {
    fn drop(&mut self) {
        self.session.close();
    }
}
