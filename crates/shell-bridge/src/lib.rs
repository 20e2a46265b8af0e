//! shell-bridge: bridge browser duplex channels to interactive host shells.
//!
//! The bridge takes a `(host, credential, session)` addressing triple,
//! resolves the records through external collaborators, dials the matching
//! transport (SSH for bare-metal hosts, an exec-style attach for pods), and
//! relays raw bytes both ways until either side terminates. Record CRUD,
//! page rendering, and the websocket server itself live outside this crate;
//! the [`channel::DuplexChannel`] trait is the seam where a server plugs in.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shell_bridge::prelude::*;
//!
//! let hosts = Arc::new(MemoryHostRegistry::new().with(HostDescriptor::baremetal(1, "10.0.0.5")));
//! let credentials =
//!     Arc::new(MemoryCredentialStore::new().with(CredentialDescriptor::ssh_key(1, "ops", pem)));
//! let bridge = SessionBridge::new(hosts, credentials);
//!
//! // `channel` is the accepted client connection (e.g. a websocket wrapper).
//! bridge.serve(SessionKey::new(1, 1, 0), channel).await?;
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod material;
pub mod mock;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

pub use bridge::{AdapterConnect, Connect, SessionBridge};
pub use channel::{
    ChannelClosed, ChannelReceiver, ChannelSender, CloseReason, DuplexChannel, Envelope,
    InboundMessage,
};
pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, ConnectError, LookupError, Result, StreamError};
pub use material::EphemeralMaterial;
pub use registry::{CredentialStore, HostRegistry, MemoryCredentialStore, MemoryHostRegistry};
pub use session::{Session, SessionEnd};
pub use transport::{BoxedTransport, Transport};
pub use types::{
    CredentialDescriptor, CredentialId, CredentialKind, Dimensions, HostDescriptor, HostId,
    HostKind, SessionKey, SessionState,
};

/// Commonly used items in one import.
pub mod prelude {
    pub use crate::bridge::SessionBridge;
    pub use crate::channel::{DuplexChannel, Envelope};
    pub use crate::config::BridgeConfig;
    pub use crate::error::{BridgeError, Result};
    pub use crate::registry::{
        CredentialStore, HostRegistry, MemoryCredentialStore, MemoryHostRegistry,
    };
    pub use crate::session::SessionEnd;
    pub use crate::types::{CredentialDescriptor, HostDescriptor, SessionKey};
}
