//! Streaming endpoint address

use serde::{Deserialize, Serialize};
use std::fmt;

/// Login credentials for the streaming endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Device streaming endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,
    /// Transport port
    pub port: u16,
    /// Optional login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl Endpoint {
    /// Endpoint without credentials
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    /// Attach credentials
    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Same host and credentials at another port
    #[inline]
    #[must_use]
    pub fn at_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let ep = Endpoint::new("router1", 57400).with_credentials("admin", "s3cret");
        let shown = format!("{ep:?}");
        assert!(shown.contains("admin"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn at_port_keeps_host_and_credentials() {
        let ep = Endpoint::new("router1", 830).with_credentials("admin", "pw");
        let grpc = ep.at_port(57400);
        assert_eq!(grpc.to_string(), "router1:57400");
        assert_eq!(grpc.credentials, ep.credentials);
    }
}
