//! Session records.
//!
//! A session is one end-to-end bridged connection between a client channel
//! and a transport. Its state is owned and mutated only by the orchestrating
//! control flow in [`bridge`](crate::bridge); the pumps signal it through
//! events rather than touching it directly.

use std::fmt;

use crate::types::{CredentialDescriptor, HostDescriptor, SessionKey, SessionState};

/// One bridged session, created by
/// [`SessionBridge::open`](crate::bridge::SessionBridge::open).
pub struct Session<Ch> {
    pub(crate) key: SessionKey,
    pub(crate) host: HostDescriptor,
    pub(crate) credential: CredentialDescriptor,
    pub(crate) state: SessionState,
    pub(crate) channel: Ch,
}

impl<Ch> Session<Ch> {
    pub(crate) fn new(
        key: SessionKey,
        host: HostDescriptor,
        credential: CredentialDescriptor,
        channel: Ch,
    ) -> Self {
        Self {
            key,
            host,
            credential,
            state: SessionState::Connecting,
            channel,
        }
    }

    /// The session's addressing key.
    #[must_use]
    pub const fn key(&self) -> SessionKey {
        self.key
    }

    /// The resolved host record.
    #[must_use]
    pub const fn host(&self) -> &HostDescriptor {
        &self.host
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }
}

impl<Ch> fmt::Debug for Session<Ch> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("host", &self.host.address)
            .field("state", &self.state)
            .finish()
    }
}

/// How a session ended when no failure was involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The transport reached EOF (remote shell or attach process finished).
    TransportEof,
    /// The client disconnected from the channel.
    ClientDisconnect,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransportEof => "transport eof",
            Self::ClientDisconnect => "client disconnect",
        };
        write!(f, "{s}")
    }
}

/// Move a session's state strictly forward.
pub(crate) fn advance(key: SessionKey, state: &mut SessionState, next: SessionState) {
    debug_assert!(
        state.can_advance_to(next),
        "invalid session transition {state} -> {next}"
    );
    tracing::debug!(session = %key, from = %state, to = %next, "session state");
    *state = next;
}
