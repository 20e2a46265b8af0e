//! SSH transport adapter.
//!
//! Connects to a bare-metal host with key-based authentication and opens one
//! interactive pseudo-terminal-backed shell channel. The private key is
//! staged as ephemeral material and destroyed before `connect` returns,
//! whatever the outcome.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use russh::client;
use russh::keys::{HashAlg, PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::timeout;

use crate::config::BridgeConfig;
use crate::error::ConnectError;
use crate::material::EphemeralMaterial;
use crate::types::{CredentialDescriptor, HostDescriptor};

/// Open an interactive shell to `host` as the credential's user.
///
/// The whole attempt (dial, handshake, auth, PTY, shell) is bounded by
/// `config.connect_timeout`; expiry surfaces as [`ConnectError::Timeout`].
/// The staged key is removed on every exit path before this returns.
pub(crate) async fn connect(
    host: &HostDescriptor,
    credential: &CredentialDescriptor,
    config: &BridgeConfig,
) -> Result<SshStream, ConnectError> {
    let username = credential.username.as_deref().ok_or_else(|| {
        ConnectError::authentication("", "ssh credential has no username")
    })?;

    let material = EphemeralMaterial::stage(credential).await?;
    let attempt = timeout(
        config.connect_timeout,
        establish(host, username, material.path(), config),
    )
    .await;
    material.remove().await;

    match attempt {
        Ok(outcome) => outcome,
        Err(_) => Err(ConnectError::timeout(config.connect_timeout)),
    }
}

async fn establish(
    host: &HostDescriptor,
    username: &str,
    key_path: &std::path::Path,
    config: &BridgeConfig,
) -> Result<SshStream, ConnectError> {
    let client_config = Arc::new(client::Config::default());
    let handler = AcceptingHandler {
        host: host.address.clone(),
        port: host.port,
    };

    tracing::debug!(host = %host.address, port = host.port, user = %username, "dialing SSH");
    let mut handle = client::connect(
        client_config,
        (host.address.as_str(), host.port),
        handler,
    )
    .await
    .map_err(|e| ConnectError::connection(&host.address, host.port, e))?;

    let key = load_key(key_path).await?;
    let rsa_hash = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
    let key = PrivateKeyWithHashAlg::new(Arc::new(key), rsa_hash);
    let auth = handle
        .authenticate_publickey(username, key)
        .await
        .map_err(|e| ConnectError::authentication(username, e))?;
    if !auth.success() {
        return Err(ConnectError::authentication(
            username,
            "public key rejected",
        ));
    }

    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| ConnectError::channel(format!("failed to open session channel: {e}")))?;
    channel
        .request_pty(
            false,
            &config.term,
            config.dimensions.cols.into(),
            config.dimensions.rows.into(),
            0,
            0,
            &[],
        )
        .await
        .map_err(|e| ConnectError::channel(format!("PTY request failed: {e}")))?;
    channel
        .request_shell(false)
        .await
        .map_err(|e| ConnectError::channel(format!("shell request failed: {e}")))?;

    tracing::info!(host = %host.address, port = host.port, user = %username, "SSH shell established");
    Ok(SshStream::new(handle, channel))
}

/// Load and decode the staged private key.
async fn load_key(path: &std::path::Path) -> Result<PrivateKey, ConnectError> {
    let pem = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConnectError::material(format!("failed to read staged key: {e}")))?;
    russh::keys::decode_secret_key(&pem, None)
        .map_err(|e| ConnectError::authentication("", format!("failed to decode private key: {e}")))
}

/// Client handler that accepts the server's host key, logging its
/// fingerprint. Key pinning is a registry-side policy decision.
struct AcceptingHandler {
    host: String,
    port: u16,
}

impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            host = %self.host,
            port = self.port,
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "accepting server host key"
        );
        Ok(true)
    }
}

/// An open SSH shell channel with async I/O.
///
/// Reads drain the channel's message stream (stderr is merged with stdout,
/// terminal output does not distinguish them); channel EOF or close surfaces
/// as a zero-length read. Shutdown closes the channel once; the connection
/// itself ends when the stream is dropped and the client handle goes with it.
pub struct SshStream {
    // Kept alive for the lifetime of the channel; dropping it tears down the
    // connection task.
    _handle: client::Handle<AcceptingHandler>,
    channel: russh::Channel<client::Msg>,
    read_buffer: VecDeque<u8>,
    exit_status: Option<u32>,
    eof: bool,
    closed: bool,
}

impl SshStream {
    fn new(handle: client::Handle<AcceptingHandler>, channel: russh::Channel<client::Msg>) -> Self {
        Self {
            _handle: handle,
            channel,
            read_buffer: VecDeque::with_capacity(4096),
            exit_status: None,
            eof: false,
            closed: false,
        }
    }

    /// Exit status of the remote shell, once reported.
    #[must_use]
    pub const fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }
}

impl std::fmt::Debug for SshStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshStream")
            .field("buffered", &self.read_buffer.len())
            .field("exit_status", &self.exit_status)
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish()
    }
}

impl AsyncRead for SshStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buffer.is_empty() {
            let len = std::cmp::min(buf.remaining(), self.read_buffer.len());
            let data: Vec<u8> = self.read_buffer.drain(..len).collect();
            buf.put_slice(&data);
            return Poll::Ready(Ok(()));
        }

        if self.eof || self.closed {
            return Poll::Ready(Ok(()));
        }

        let this = self.get_mut();
        loop {
            // channel.wait() is backed by an mpsc receiver, so dropping a
            // pending future between polls loses nothing.
            let wait = this.channel.wait();
            tokio::pin!(wait);

            match wait.poll(cx) {
                Poll::Ready(Some(msg)) => match msg {
                    russh::ChannelMsg::Data { data } => {
                        let len = std::cmp::min(buf.remaining(), data.len());
                        buf.put_slice(&data[..len]);
                        if len < data.len() {
                            this.read_buffer.extend(&data[len..]);
                        }
                        return Poll::Ready(Ok(()));
                    }
                    russh::ChannelMsg::ExtendedData { data, ext } => {
                        // ext 1 is stderr; merge it with the shell output.
                        if ext == 1 {
                            let len = std::cmp::min(buf.remaining(), data.len());
                            buf.put_slice(&data[..len]);
                            if len < data.len() {
                                this.read_buffer.extend(&data[len..]);
                            }
                            return Poll::Ready(Ok(()));
                        }
                    }
                    russh::ChannelMsg::ExitStatus { exit_status } => {
                        this.exit_status = Some(exit_status);
                    }
                    russh::ChannelMsg::Eof | russh::ChannelMsg::Close => {
                        this.eof = true;
                        return Poll::Ready(Ok(()));
                    }
                    _ => {}
                },
                Poll::Ready(None) => {
                    this.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for SshStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "SSH channel is closed",
            )));
        }

        let send = this.channel.data(buf);
        tokio::pin!(send);

        match send.poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(buf.len())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(io::Error::other(format!(
                "SSH write failed: {e}"
            )))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // SSH channels have no explicit flush.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }

        let close = this.channel.close();
        tokio::pin!(close);

        match close.poll(cx) {
            Poll::Ready(outcome) => {
                // Teardown is best-effort; the peer may already be gone.
                if let Err(e) = outcome {
                    tracing::debug!(error = %e, "SSH channel close failed");
                }
                this.closed = true;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
