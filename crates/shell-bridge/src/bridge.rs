//! The session bridge.
//!
//! [`SessionBridge`] owns the only real concurrency in the system: for each
//! session it resolves the host and credential records, dials the matching
//! transport adapter, then runs two concurrent activities for the session's
//! streaming lifetime:
//!
//! - the **inbound pump**, sole reader of the transport, forwarding chunks in
//!   order through a bounded queue, and
//! - the **outbound relay**, sole consumer of inbound channel frames and sole
//!   writer to the transport.
//!
//! The orchestrating loop in [`SessionBridge::run`] is the only sender into
//! the client channel and the only mutator of session state; either side
//! terminating drives one teardown pass that closes the transport exactly
//! once and the channel exactly once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::channel::{
    ChannelReceiver, ChannelSender, CloseReason, DuplexChannel, Envelope, InboundMessage,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ConnectError, LookupError, StreamError};
use crate::registry::{CredentialStore, HostRegistry};
use crate::session::{Session, SessionEnd, advance};
use crate::transport::{BoxedTransport, exec, ssh};
use crate::types::{CredentialDescriptor, HostDescriptor, HostKind, SessionKey, SessionState};

/// Establishes a transport for a resolved host/credential pair.
///
/// The default implementation dispatches on the host kind; tests substitute
/// scripted transports through this seam.
#[async_trait]
pub trait Connect: Send + Sync {
    /// Connect a transport to the target described by `host`.
    async fn connect(
        &self,
        host: HostDescriptor,
        credential: CredentialDescriptor,
        config: BridgeConfig,
    ) -> Result<BoxedTransport, ConnectError>;
}

/// The production connector: baremetal hosts go over SSH, pods over the
/// exec-style attach.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterConnect;

#[async_trait]
impl Connect for AdapterConnect {
    async fn connect(
        &self,
        host: HostDescriptor,
        credential: CredentialDescriptor,
        config: BridgeConfig,
    ) -> Result<BoxedTransport, ConnectError> {
        match host.kind {
            HostKind::Baremetal => Ok(Box::new(ssh::connect(&host, &credential, &config).await?)),
            HostKind::Pod => Ok(Box::new(exec::connect(&host, &credential, &config).await?)),
            // run() rejects unknown kinds before dialing; this arm only
            // matters for direct callers.
            HostKind::Unknown => Err(ConnectError::setup(format!(
                "no transport adapter for host kind '{}'",
                host.kind
            ))),
        }
    }
}

/// Bridges client duplex channels to host transports.
///
/// Holds no per-session state; every [`open`](Self::open)/[`run`](Self::run)
/// pair is independent, and nothing is shared across sessions.
pub struct SessionBridge {
    hosts: Arc<dyn HostRegistry>,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn Connect>,
    config: BridgeConfig,
}

impl fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBridge")
            .field("config", &self.config)
            .finish()
    }
}

impl SessionBridge {
    /// Create a bridge over the given collaborators with the default
    /// configuration and adapter dispatch.
    #[must_use]
    pub fn new(hosts: Arc<dyn HostRegistry>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            hosts,
            credentials,
            connector: Arc::new(AdapterConnect),
            config: BridgeConfig::default(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the connector. Mainly a test seam.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connect>) -> Self {
        self.connector = connector;
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Resolve both ids and create a session over `channel`.
    ///
    /// On a failed lookup no transport is created and the channel sees
    /// nothing but a single terminal error envelope followed by closure.
    pub async fn open<Ch: DuplexChannel>(
        &self,
        key: SessionKey,
        channel: Ch,
    ) -> Result<Session<Ch>, BridgeError> {
        let Some(host) = self.hosts.get(key.host).await else {
            let err = LookupError::host(key.host);
            tracing::warn!(session = %key, error = %err, "lookup failed");
            reject(channel, &err.to_string()).await;
            return Err(err.into());
        };
        let Some(credential) = self.credentials.get(key.credential).await else {
            let err = LookupError::credential(key.credential);
            tracing::warn!(session = %key, error = %err, "lookup failed");
            reject(channel, &err.to_string()).await;
            return Err(err.into());
        };

        tracing::debug!(session = %key, host = %host.address, kind = %host.kind, "session opened");
        Ok(Session::new(key, host, credential, channel))
    }

    /// Drive a session from DIALING through STREAMING to CLOSED.
    ///
    /// Returns how the session ended; failures have already been surfaced to
    /// the client as a terminal error envelope by the time this returns.
    pub async fn run<Ch: DuplexChannel>(
        &self,
        session: Session<Ch>,
    ) -> Result<SessionEnd, BridgeError> {
        let Session {
            key,
            host,
            credential,
            mut state,
            channel,
        } = session;
        advance(key, &mut state, SessionState::Dialing);
        let (mut sender, receiver) = channel.split();

        if !matches!(host.kind, HostKind::Baremetal | HostKind::Pod) {
            let err = BridgeError::UnsupportedHostKind {
                kind: host.kind.to_string(),
            };
            tracing::warn!(session = %key, kind = %host.kind, "rejecting unsupported host kind");
            let _ = sender.send(Envelope::error(err.to_string())).await;
            sender.close(CloseReason::Failed).await;
            advance(key, &mut state, SessionState::Closed);
            return Err(err);
        }

        // The dial runs on its own task; the orchestrating flow only awaits
        // its completion.
        let connector = Arc::clone(&self.connector);
        let dial_host = host.clone();
        let dial_config = self.config.clone();
        let dial =
            tokio::spawn(async move { connector.connect(dial_host, credential, dial_config).await });
        let dialed = match dial.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ConnectError::setup(format!("dial task failed: {e}"))),
        };
        let transport = match dialed {
            Ok(transport) => transport,
            Err(err) => {
                let err = BridgeError::from(err);
                tracing::warn!(session = %key, error = %err, "dial failed");
                let _ = sender.send(Envelope::error(err.to_string())).await;
                sender.close(CloseReason::Failed).await;
                advance(key, &mut state, SessionState::Closed);
                return Err(err);
            }
        };

        advance(key, &mut state, SessionState::Streaming);
        tracing::info!(session = %key, host = %host.address, kind = %host.kind, "session streaming");

        let (read_half, write_half) = tokio::io::split(transport);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (pump_tx, mut pump_events) = mpsc::channel(self.config.event_capacity);
        let pump = tokio::spawn(inbound_pump(
            read_half,
            pump_tx,
            shutdown_rx.clone(),
            self.config.poll_interval,
            self.config.read_buffer_size,
            key,
        ));
        let (relay_tx, mut relay_events) = mpsc::channel(4);
        let relay = tokio::spawn(outbound_relay(
            receiver,
            write_half,
            relay_tx,
            shutdown_rx,
            key,
        ));

        let cause = loop {
            tokio::select! {
                event = pump_events.recv() => match event {
                    Some(PumpEvent::Data(chunk)) => {
                        // Terminal output is not guaranteed well-formed at
                        // chunk boundaries; replace instead of rejecting.
                        let text = String::from_utf8_lossy(&chunk).into_owned();
                        if sender.send(Envelope::data(text)).await.is_err() {
                            break EndCause::Disconnected;
                        }
                    }
                    Some(PumpEvent::Eof) | None => break EndCause::Eof,
                    Some(PumpEvent::Failed(err)) => break EndCause::Failed(err),
                },
                event = relay_events.recv() => match event {
                    Some(RelayEvent::Disconnected) | None => break EndCause::Disconnected,
                    Some(RelayEvent::Failed(err)) => break EndCause::Failed(err),
                },
            }
        };

        advance(key, &mut state, SessionState::Closing);
        let _ = shutdown_tx.send(true);
        // Dropping the event receivers unblocks a pump stuck sending into a
        // full queue; its next send fails and it exits.
        drop(pump_events);
        drop(relay_events);
        let _ = pump.await;
        // The relay hands the write half back so the transport is closed
        // exactly once, here, whichever side ended the session.
        match relay.await {
            Ok(mut write_half) => {
                if let Err(e) = write_half.shutdown().await {
                    tracing::debug!(session = %key, error = %e, "transport close failed");
                }
            }
            Err(e) => tracing::warn!(session = %key, error = %e, "relay task failed"),
        }

        let outcome = match cause {
            EndCause::Failed(err) => {
                let err = BridgeError::from(err);
                let _ = sender.send(Envelope::error(err.to_string())).await;
                sender.close(CloseReason::Failed).await;
                Err(err)
            }
            EndCause::Eof => {
                sender.close(CloseReason::Done).await;
                Ok(SessionEnd::TransportEof)
            }
            EndCause::Disconnected => {
                sender.close(CloseReason::Done).await;
                Ok(SessionEnd::ClientDisconnect)
            }
        };
        advance(key, &mut state, SessionState::Closed);
        match &outcome {
            Ok(end) => tracing::info!(session = %key, end = %end, "session closed"),
            Err(err) => tracing::info!(session = %key, error = %err, "session closed"),
        }
        outcome
    }

    /// Open and run in one call.
    pub async fn serve<Ch: DuplexChannel>(
        &self,
        key: SessionKey,
        channel: Ch,
    ) -> Result<SessionEnd, BridgeError> {
        let session = self.open(key, channel).await?;
        self.run(session).await
    }
}

/// Deliver a terminal error envelope and close, for failures before a
/// session ever streams.
async fn reject<Ch: DuplexChannel>(channel: Ch, message: &str) {
    let (mut sender, receiver) = channel.split();
    drop(receiver);
    let _ = sender.send(Envelope::error(message)).await;
    sender.close(CloseReason::Failed).await;
}

enum PumpEvent {
    Data(Bytes),
    Eof,
    Failed(StreamError),
}

enum RelayEvent {
    Disconnected,
    Failed(StreamError),
}

enum EndCause {
    Eof,
    Disconnected,
    Failed(StreamError),
}

/// Sole reader of the transport. Forwards chunks in read order; observes a
/// shutdown request within one poll interval.
async fn inbound_pump(
    mut reader: ReadHalf<BoxedTransport>,
    events: mpsc::Sender<PumpEvent>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
    buffer_size: usize,
    key: SessionKey,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            read = timeout(poll_interval, reader.read(&mut buf)) => match read {
                // Nothing ready within the poll window; check shutdown again.
                Err(_) => {}
                Ok(Ok(0)) => {
                    tracing::debug!(session = %key, "transport eof");
                    let _ = events.send(PumpEvent::Eof).await;
                    break;
                }
                Ok(Ok(n)) => {
                    if events
                        .send(PumpEvent::Data(Bytes::copy_from_slice(&buf[..n])))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!(session = %key, error = %e, "transport read failed");
                    let _ = events.send(PumpEvent::Failed(StreamError::read(e))).await;
                    break;
                }
            },
        }
    }
}

/// Sole consumer of inbound channel frames and sole writer to the transport.
/// Malformed frames are dropped and logged; the session continues. Returns
/// the write half so teardown can issue the single transport close.
async fn outbound_relay<R: ChannelReceiver + 'static>(
    mut receiver: R,
    mut writer: WriteHalf<BoxedTransport>,
    events: mpsc::Sender<RelayEvent>,
    mut shutdown: watch::Receiver<bool>,
    key: SessionKey,
) -> WriteHalf<BoxedTransport> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = receiver.receive() => match frame {
                Some(frame) => match InboundMessage::parse(&frame) {
                    Ok(message) => {
                        if message.data.is_empty() {
                            continue;
                        }
                        let written = async {
                            writer.write_all(message.data.as_bytes()).await?;
                            writer.flush().await
                        }
                        .await;
                        if let Err(e) = written {
                            tracing::debug!(session = %key, error = %e, "transport write failed");
                            let _ = events.send(RelayEvent::Failed(StreamError::write(e))).await;
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session = %key, error = %e, "dropping malformed inbound frame");
                    }
                },
                None => {
                    tracing::debug!(session = %key, "client disconnected");
                    let _ = events.send(RelayEvent::Disconnected).await;
                    break;
                }
            },
        }
    }
    writer
}
