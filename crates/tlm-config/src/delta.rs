//! Staged configuration edits
//!
//! A [`ConfigDelta`] is one edit proposed against the candidate datastore:
//! an [`EditOperation`] applied at a [`ConfigPath`].

use crate::node::ConfigNode;
use crate::path::ConfigPath;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Edit operation at a target path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "op", content = "node")]
pub enum EditOperation {
    /// Create the element
    ///
    /// Fails at commit if the element already exists.
    Create(ConfigNode),

    /// Merge into the element, creating it if absent
    Merge(ConfigNode),

    /// Replace the element entirely, creating it if absent
    Replace(ConfigNode),

    /// Remove the element
    ///
    /// Removing an absent element is not an error.
    Remove,
}

impl EditOperation {
    /// Operation keyword as used in datastore edits
    #[inline]
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Merge(_) => "merge",
            Self::Replace(_) => "replace",
            Self::Remove => "remove",
        }
    }

    /// Payload element, if the operation carries one
    #[inline]
    #[must_use]
    pub fn node(&self) -> Option<&ConfigNode> {
        match self {
            Self::Create(node) | Self::Merge(node) | Self::Replace(node) => Some(node),
            Self::Remove => None,
        }
    }
}

/// One staged edit
///
/// # Invariants
/// - a payload node's name equals the target path's last segment name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDelta {
    target: ConfigPath,
    operation: EditOperation,
}

impl ConfigDelta {
    /// Create new delta
    #[inline]
    #[must_use]
    pub fn new(target: ConfigPath, operation: EditOperation) -> Self {
        Self { target, operation }
    }

    /// Create `node` at `target`
    #[inline]
    #[must_use]
    pub fn create(target: ConfigPath, node: ConfigNode) -> Self {
        Self::new(target, EditOperation::Create(node))
    }

    /// Merge `node` into `target`
    #[inline]
    #[must_use]
    pub fn merge(target: ConfigPath, node: ConfigNode) -> Self {
        Self::new(target, EditOperation::Merge(node))
    }

    /// Replace `target` with `node`
    #[inline]
    #[must_use]
    pub fn replace(target: ConfigPath, node: ConfigNode) -> Self {
        Self::new(target, EditOperation::Replace(node))
    }

    /// Remove `target`
    #[inline]
    #[must_use]
    pub fn remove(target: ConfigPath) -> Self {
        Self::new(target, EditOperation::Remove)
    }

    /// Target path
    #[inline]
    #[must_use]
    pub fn target(&self) -> &ConfigPath {
        &self.target
    }

    /// Operation
    #[inline]
    #[must_use]
    pub fn operation(&self) -> &EditOperation {
        &self.operation
    }

    /// Whether this delta removes its target
    #[inline]
    #[must_use]
    pub fn is_removal(&self) -> bool {
        matches!(self.operation, EditOperation::Remove)
    }

    /// Check the payload names the same element as the target
    ///
    /// # Errors
    /// Returns [`DeltaError::NameMismatch`] when they differ
    pub fn validate(&self) -> Result<(), DeltaError> {
        if let Some(node) = self.operation.node() {
            let expected = self.target.last().name();
            if node.name() != expected {
                return Err(DeltaError::NameMismatch {
                    target: self.target.to_string(),
                    node: node.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Display for ConfigDelta {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation.keyword(), self.target)
    }
}

/// Delta validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    /// Payload element does not match the target path
    #[error("payload <{node}> does not match target {target}")]
    NameMismatch { target: String, node: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grpc() -> ConfigPath {
        ConfigPath::subtree("urn:ems", "grpc")
    }

    #[test]
    fn display_shows_keyword_and_target() {
        let delta = ConfigDelta::remove(grpc().child("enable"));
        assert_eq!(delta.to_string(), "remove {urn:ems}grpc/enable");
        assert!(delta.is_removal());
    }

    #[test]
    fn validate_accepts_matching_payload() {
        let delta = ConfigDelta::merge(grpc(), ConfigNode::new("grpc").with_empty_child("enable"));
        assert!(delta.validate().is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_payload() {
        let delta = ConfigDelta::create(grpc().child("port"), ConfigNode::leaf("address", "x"));
        assert!(matches!(
            delta.validate(),
            Err(DeltaError::NameMismatch { .. })
        ));
    }

    #[test]
    fn operation_payload_access() {
        assert!(EditOperation::Remove.node().is_none());
        let op = EditOperation::Replace(ConfigNode::new("grpc"));
        assert_eq!(op.keyword(), "replace");
        assert_eq!(op.node().map(ConfigNode::name), Some("grpc"));
    }
}
