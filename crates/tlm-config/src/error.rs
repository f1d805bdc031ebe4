//! Error types for the configuration store
//!
//! Device-provided detail is carried verbatim so callers can report it
//! without access to raw protocol traces.

use crate::delta::DeltaError;

/// Configuration store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Session could not be opened, or was used after it was closed
    #[error("configuration session error: {0}")]
    Session(String),

    /// Device rejected a read, or returned data that cannot be interpreted
    #[error("failed to read {path}: {detail}")]
    Read { path: String, detail: String },

    /// Device rejected the staged edits at commit
    #[error("commit rejected: {detail}")]
    Commit { detail: String },

    /// Edit is malformed and was not staged
    #[error("invalid edit: {0}")]
    InvalidEdit(#[from] DeltaError),

    /// Running data does not fit the telemetry model
    #[error("invalid configuration data: {0}")]
    InvalidData(String),
}

impl ConfigError {
    /// Read failure for `path`
    #[inline]
    pub fn read(path: impl ToString, detail: impl Into<String>) -> Self {
        Self::Read {
            path: path.to_string(),
            detail: detail.into(),
        }
    }

    /// Commit failure with device detail
    #[inline]
    pub fn commit(detail: impl Into<String>) -> Self {
        Self::Commit {
            detail: detail.into(),
        }
    }

    /// Device-provided detail message
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Session(detail)
            | Self::Read { detail, .. }
            | Self::Commit { detail }
            | Self::InvalidData(detail) => detail.clone(),
            Self::InvalidEdit(err) => err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = ConfigError::commit("'grpc' port 0 out of range");
        assert_eq!(err.to_string(), "commit rejected: 'grpc' port 0 out of range");
        assert_eq!(err.detail(), "'grpc' port 0 out of range");
    }

    #[test]
    fn read_error_names_path() {
        let err = ConfigError::read("{urn:ems}grpc", "access denied");
        assert!(err.to_string().contains("{urn:ems}grpc"));
    }
}
