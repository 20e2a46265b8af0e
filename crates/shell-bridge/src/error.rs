//! Error types for shell-bridge.
//!
//! Every failure that ends a session maps to one of the variants of
//! [`BridgeError`]; the bridge surfaces it to the client as a single terminal
//! error envelope before closing the channel. Malformed inbound frames are
//! deliberately not represented here: they are dropped and logged without
//! affecting the session.
//!
//! Secret material never appears in any error message.

use std::time::Duration;

use thiserror::Error;

use crate::types::{CredentialId, HostId};

/// The umbrella error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A host or credential id could not be resolved.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// The host record carries a kind no adapter handles.
    #[error("unsupported host kind '{kind}'")]
    UnsupportedHostKind {
        /// The stored kind value.
        kind: String,
    },

    /// Establishing the transport failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The transport failed mid-session.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl BridgeError {
    /// Check if this is a lookup failure.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }

    /// Check if this is an unsupported-host-kind failure.
    #[must_use]
    pub const fn is_unsupported_kind(&self) -> bool {
        matches!(self, Self::UnsupportedHostKind { .. })
    }

    /// Check if this is a connect failure.
    #[must_use]
    pub const fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }

    /// Check if this is a mid-session stream failure.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// A host or credential id that is absent from its collaborator store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// Unknown host id.
    #[error("host {id} not found")]
    Host {
        /// The id that was looked up.
        id: HostId,
    },

    /// Unknown credential id.
    #[error("credential {id} not found")]
    Credential {
        /// The id that was looked up.
        id: CredentialId,
    },
}

impl LookupError {
    /// Create a host-not-found error.
    #[must_use]
    pub const fn host(id: HostId) -> Self {
        Self::Host { id }
    }

    /// Create a credential-not-found error.
    #[must_use]
    pub const fn credential(id: CredentialId) -> Self {
        Self::Credential { id }
    }
}

/// Errors establishing a transport. By the time one of these is returned,
/// any ephemeral credential material has already been destroyed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The target could not be reached.
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connection {
        /// Target address.
        host: String,
        /// Target port.
        port: u16,
        /// Underlying cause.
        reason: String,
    },

    /// Authentication was rejected or the key could not be used.
    #[error("authentication failed for user '{user}': {reason}")]
    Authentication {
        /// The user that failed to authenticate.
        user: String,
        /// Underlying cause.
        reason: String,
    },

    /// The connect attempt exceeded its bound.
    #[error("connect timed out after {duration:?}")]
    Timeout {
        /// The configured bound that elapsed.
        duration: Duration,
    },

    /// Staging the credential material failed.
    #[error("failed to stage credential material: {reason}")]
    Material {
        /// Underlying cause (never the secret itself).
        reason: String,
    },

    /// The attach process could not be started.
    #[error("failed to start attach process: {reason}")]
    Spawn {
        /// Underlying cause.
        reason: String,
    },

    /// The shell channel could not be set up after authentication.
    #[error("shell channel setup failed: {reason}")]
    Channel {
        /// Underlying cause.
        reason: String,
    },

    /// Connect orchestration failed outside the dial itself.
    #[error("connect setup failed: {reason}")]
    Setup {
        /// Underlying cause.
        reason: String,
    },
}

impl ConnectError {
    /// Create a connection error.
    pub fn connection(host: impl Into<String>, port: u16, reason: impl ToString) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            reason: reason.to_string(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(user: impl Into<String>, reason: impl ToString) -> Self {
        Self::Authentication {
            user: user.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a material-staging error.
    pub fn material(reason: impl ToString) -> Self {
        Self::Material {
            reason: reason.to_string(),
        }
    }

    /// Create a spawn error.
    pub fn spawn(reason: impl ToString) -> Self {
        Self::Spawn {
            reason: reason.to_string(),
        }
    }

    /// Create a channel-setup error.
    pub fn channel(reason: impl ToString) -> Self {
        Self::Channel {
            reason: reason.to_string(),
        }
    }

    /// Create a setup error.
    pub fn setup(reason: impl ToString) -> Self {
        Self::Setup {
            reason: reason.to_string(),
        }
    }

    /// Check if this is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is an authentication failure.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Check if this is a connection failure.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Transport read/write failures during STREAMING.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Reading from the transport failed.
    #[error("transport read failed: {reason}")]
    Read {
        /// Underlying cause.
        reason: String,
    },

    /// Writing to the transport failed.
    #[error("transport write failed: {reason}")]
    Write {
        /// Underlying cause.
        reason: String,
    },
}

impl StreamError {
    /// Create a read error.
    pub fn read(reason: impl ToString) -> Self {
        Self::Read {
            reason: reason.to_string(),
        }
    }

    /// Create a write error.
    pub fn write(reason: impl ToString) -> Self {
        Self::Write {
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_error_display() {
        assert_eq!(LookupError::host(9999).to_string(), "host 9999 not found");
        assert_eq!(
            LookupError::credential(2).to_string(),
            "credential 2 not found"
        );
    }

    #[test]
    fn lookup_error_is_transparent() {
        let err: BridgeError = LookupError::host(9999).into();
        assert!(err.is_lookup());
        assert_eq!(err.to_string(), "host 9999 not found");
    }

    #[test]
    fn connect_error_display() {
        let err = ConnectError::connection("10.0.0.5", 22, "connection refused");
        assert_eq!(
            err.to_string(),
            "failed to connect to 10.0.0.5:22: connection refused"
        );
        assert!(err.is_connection());

        let err = ConnectError::timeout(Duration::from_secs(10));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn authentication_error_display() {
        let err = ConnectError::authentication("ops", "public key rejected");
        assert!(err.is_authentication());
        assert!(err.to_string().contains("ops"));
        assert!(err.to_string().contains("public key rejected"));
    }

    #[test]
    fn stream_error_display() {
        let err = StreamError::read("connection reset");
        assert_eq!(err.to_string(), "transport read failed: connection reset");

        let err: BridgeError = StreamError::write("broken pipe").into();
        assert!(err.is_stream());
        assert_eq!(err.to_string(), "transport write failed: broken pipe");
    }

    #[test]
    fn unsupported_kind_display() {
        let err = BridgeError::UnsupportedHostKind {
            kind: "unknown".to_string(),
        };
        assert!(err.is_unsupported_kind());
        assert_eq!(err.to_string(), "unsupported host kind 'unknown'");
    }
}
