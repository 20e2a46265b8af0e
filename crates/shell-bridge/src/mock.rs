//! Test support: scriptable transports, connectors, and in-memory channels.
//!
//! These doubles let embedders (and this crate's own tests) drive full
//! bridge sessions without real SSH servers or attach processes.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::bridge::Connect;
use crate::channel::{
    ChannelClosed, ChannelReceiver, ChannelSender, CloseReason, DuplexChannel, Envelope,
};
use crate::config::BridgeConfig;
use crate::error::ConnectError;
use crate::transport::BoxedTransport;
use crate::types::{CredentialDescriptor, HostDescriptor};

#[derive(Debug, Default)]
struct MockState {
    output: VecDeque<u8>,
    input: Vec<u8>,
    eof: bool,
    read_error: Option<String>,
    shutdowns: usize,
    waker: Option<Waker>,
}

impl MockState {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// A scriptable in-memory transport.
///
/// Clones share state: hand one clone to the bridge and keep another as the
/// control handle for queueing output and inspecting writes.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create an idle transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes for the next reads.
    pub fn push_output(&self, data: &[u8]) {
        let mut state = self.lock();
        state.output.extend(data);
        state.wake();
    }

    /// Signal EOF once the queued output has drained.
    pub fn signal_eof(&self) {
        let mut state = self.lock();
        state.eof = true;
        state.wake();
    }

    /// Make the next read fail.
    pub fn fail_reads(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        state.read_error = Some(reason.into());
        state.wake();
    }

    /// Everything written to the transport so far, in order.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.lock().input.clone()
    }

    /// How many times shutdown has been requested.
    #[must_use]
    pub fn shutdown_count(&self) -> usize {
        self.lock().shutdowns
    }
}

impl AsyncRead for MockTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.lock();

        if let Some(reason) = state.read_error.take() {
            return Poll::Ready(Err(io::Error::other(reason)));
        }

        if !state.output.is_empty() {
            let len = std::cmp::min(buf.remaining(), state.output.len());
            let data: Vec<u8> = state.output.drain(..len).collect();
            buf.put_slice(&data);
            return Poll::Ready(Ok(()));
        }

        if state.eof {
            return Poll::Ready(Ok(()));
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.lock();
        if state.shutdowns > 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transport is closed",
            )));
        }
        state.input.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.lock();
        state.shutdowns += 1;
        state.eof = true;
        state.wake();
        Poll::Ready(Ok(()))
    }
}

/// A connector that hands out scripted transports and counts dial attempts.
#[derive(Debug, Default)]
pub struct MockConnect {
    transports: Mutex<VecDeque<MockTransport>>,
    attempts: AtomicUsize,
    fail_next: Mutex<Option<ConnectError>>,
}

impl MockConnect {
    /// Create a connector with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a transport for the next dial.
    pub fn push(&self, transport: MockTransport) {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(transport);
    }

    /// Make the next dial fail with `error`.
    pub fn fail_next(&self, error: ConnectError) {
        *self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Number of dial attempts observed.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connect for MockConnect {
    async fn connect(
        &self,
        _host: HostDescriptor,
        _credential: CredentialDescriptor,
        _config: BridgeConfig,
    ) -> Result<BoxedTransport, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(error);
        }

        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .map(|transport| Box::new(transport) as BoxedTransport)
            .ok_or_else(|| ConnectError::setup("no scripted transport"))
    }
}

/// A frame observed by the client-side peer of a [`MemoryChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// A serialized outbound envelope.
    Frame(String),
    /// The bridge closed the channel.
    Closed(CloseReason),
}

impl PeerFrame {
    /// Parse the frame as an envelope, if it is one.
    #[must_use]
    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            Self::Frame(text) => serde_json::from_str(text).ok(),
            Self::Closed(_) => None,
        }
    }
}

/// An in-memory duplex channel for tests.
#[derive(Debug)]
pub struct MemoryChannel {
    outbound: mpsc::Sender<PeerFrame>,
    inbound: mpsc::Receiver<String>,
}

/// The client side of a [`MemoryChannel`].
#[derive(Debug)]
pub struct MemoryChannelPeer {
    to_bridge: Option<mpsc::Sender<String>>,
    from_bridge: mpsc::Receiver<PeerFrame>,
}

/// Create a channel/peer pair.
#[must_use]
pub fn memory_channel(capacity: usize) -> (MemoryChannel, MemoryChannelPeer) {
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    (
        MemoryChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        },
        MemoryChannelPeer {
            to_bridge: Some(inbound_tx),
            from_bridge: outbound_rx,
        },
    )
}

impl MemoryChannelPeer {
    /// Send a raw frame to the bridge.
    pub async fn send(&self, frame: impl Into<String>) -> Result<(), ChannelClosed> {
        match &self.to_bridge {
            Some(tx) => tx.send(frame.into()).await.map_err(|_| ChannelClosed),
            None => Err(ChannelClosed),
        }
    }

    /// Next frame from the bridge; `None` once the bridge side is gone.
    pub async fn recv(&mut self) -> Option<PeerFrame> {
        self.from_bridge.recv().await
    }

    /// Disconnect the client side; the bridge observes end-of-frames.
    pub fn disconnect(&mut self) {
        self.to_bridge = None;
    }
}

/// Sending half handed to the bridge.
#[derive(Debug)]
pub struct MemorySender {
    outbound: mpsc::Sender<PeerFrame>,
    closed: bool,
}

/// Receiving half handed to the bridge.
#[derive(Debug)]
pub struct MemoryReceiver {
    inbound: mpsc::Receiver<String>,
}

impl DuplexChannel for MemoryChannel {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        (
            MemorySender {
                outbound: self.outbound,
                closed: false,
            },
            MemoryReceiver {
                inbound: self.inbound,
            },
        )
    }
}

#[async_trait]
impl ChannelSender for MemorySender {
    async fn send(&mut self, envelope: Envelope) -> Result<(), ChannelClosed> {
        if self.closed {
            return Err(ChannelClosed);
        }
        self.outbound
            .send(PeerFrame::Frame(envelope.to_json()))
            .await
            .map_err(|_| ChannelClosed)
    }

    async fn close(&mut self, reason: CloseReason) {
        if !self.closed {
            self.closed = true;
            let _ = self.outbound.send(PeerFrame::Closed(reason)).await;
        }
    }
}

#[async_trait]
impl ChannelReceiver for MemoryReceiver {
    async fn receive(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}
