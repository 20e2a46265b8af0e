//! Core types for shell-bridge.
//!
//! This module defines the host and credential descriptors resolved through
//! the external collaborators, the session addressing key, and the session
//! state machine.

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Identifier of a host record in the external host registry.
pub type HostId = u64;

/// Identifier of a credential record in the external credential store.
pub type CredentialId = u64;

/// Default SSH port for bare-metal hosts.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default namespace for pod hosts when none is recorded.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The addressing triple that identifies one bridged session.
///
/// `number` is a caller-supplied multiplexing discriminator with no effect on
/// bridge behavior; it only shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Host record id.
    pub host: HostId,
    /// Credential record id.
    pub credential: CredentialId,
    /// Caller-side session number (display/bookkeeping only).
    pub number: u32,
}

impl SessionKey {
    /// Create a new session key.
    #[must_use]
    pub const fn new(host: HostId, credential: CredentialId, number: u32) -> Self {
        Self {
            host,
            credential,
            number,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.credential, self.number)
    }
}

/// The kind of target a host record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// A bare-metal or VM host reachable over SSH.
    Baremetal,
    /// A containerized workload reached through an exec-style attach.
    Pod,
    /// Any unrecognized stored value. Rejected at dial time.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Baremetal => "baremetal",
            Self::Pod => "pod",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The kind of secret a credential record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// An SSH private key (PEM/OpenSSH text).
    SshKey,
    /// A kubeconfig document.
    Kubeconfig,
}

impl CredentialKind {
    /// Whether this credential kind can drive a transport for the given host
    /// kind. Compatibility is a caller-side validation concern; the bridge
    /// assumes it as a precondition and does not enforce it.
    #[must_use]
    pub const fn compatible_with(self, host: HostKind) -> bool {
        matches!(
            (self, host),
            (Self::SshKey, HostKind::Baremetal) | (Self::Kubeconfig, HostKind::Pod)
        )
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SshKey => "ssh_key",
            Self::Kubeconfig => "kubeconfig",
        };
        write!(f, "{s}")
    }
}

/// A host record, fetched once at connect time and immutable for the
/// lifetime of a session.
#[derive(Debug, Clone, Deserialize)]
pub struct HostDescriptor {
    /// Record id.
    pub id: HostId,
    /// Target kind; selects the transport adapter.
    pub kind: HostKind,
    /// IP or hostname for bare-metal hosts, pod name for pods.
    pub address: String,
    /// SSH port (bare-metal only).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Namespace (pods only); `"default"` when absent.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Container name (pods only, optional).
    #[serde(default)]
    pub container: Option<String>,
}

const fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl HostDescriptor {
    /// Create a bare-metal host descriptor with the default SSH port.
    #[must_use]
    pub fn baremetal(id: HostId, address: impl Into<String>) -> Self {
        Self {
            id,
            kind: HostKind::Baremetal,
            address: address.into(),
            port: DEFAULT_SSH_PORT,
            namespace: None,
            container: None,
        }
    }

    /// Create a pod host descriptor; `address` is the pod name.
    #[must_use]
    pub fn pod(id: HostId, address: impl Into<String>) -> Self {
        Self {
            id,
            kind: HostKind::Pod,
            address: address.into(),
            port: DEFAULT_SSH_PORT,
            namespace: None,
            container: None,
        }
    }

    /// Set the SSH port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the container name.
    #[must_use]
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// The effective namespace for pod hosts.
    #[must_use]
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// A credential record. The secret content is wrapped so it never appears in
/// `Debug` output or serialized forms; transports expose it only long enough
/// to stage ephemeral material.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialDescriptor {
    /// Record id.
    pub id: CredentialId,
    /// Secret kind; must match the host kind (caller-validated).
    pub kind: CredentialKind,
    /// The secret itself: private key text or kubeconfig document.
    pub secret: SecretString,
    /// Login user (SSH keys only).
    #[serde(default)]
    pub username: Option<String>,
}

impl CredentialDescriptor {
    /// Create an SSH key credential.
    #[must_use]
    pub fn ssh_key(
        id: CredentialId,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind: CredentialKind::SshKey,
            secret: SecretString::new(secret.into()),
            username: Some(username.into()),
        }
    }

    /// Create a kubeconfig credential.
    #[must_use]
    pub fn kubeconfig(id: CredentialId, secret: impl Into<String>) -> Self {
        Self {
            id,
            kind: CredentialKind::Kubeconfig,
            secret: SecretString::new(secret.into()),
            username: None,
        }
    }
}

/// Terminal dimensions for the SSH pseudo-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in columns.
    pub cols: u16,
    /// Height in rows.
    pub rows: u16,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(120, 40)
    }
}

/// The state of a session. Transitions are strictly forward; no state is
/// revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Channel accepted, ids parsed.
    Connecting,
    /// Resolving descriptors and dialing the transport.
    Dialing,
    /// Pump and relay are live.
    Streaming,
    /// Teardown in progress.
    Closing,
    /// Fully torn down; the transport handle has been released.
    Closed,
}

impl SessionState {
    /// Whether the session has reached its terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether a transition from `self` to `next` moves strictly forward.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next > self
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Dialing => "dialing",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}
