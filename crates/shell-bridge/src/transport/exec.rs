//! Exec-style attach transport adapter.
//!
//! Connects to a pod by spawning an external attach process
//! (`kubectl … exec -i -t … -- /bin/bash -i`) configured through an
//! ephemeral kubeconfig. stdout and stderr are merged into one readable
//! stream by a drain task; process exit with code 0 surfaces as EOF,
//! any other exit as a read error the bridge classifies as a stream failure.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use crate::config::BridgeConfig;
use crate::error::ConnectError;
use crate::material::EphemeralMaterial;
use crate::types::{CredentialDescriptor, HostDescriptor};

/// The interactive shell the attach ultimately runs. Fixed by contract;
/// arbitrary command execution is deliberately not configurable.
const ATTACH_SHELL: [&str; 2] = ["/bin/bash", "-i"];

/// Attach to the pod named by `host.address`.
///
/// The kubeconfig is staged before the spawn and removed as soon as the
/// spawn attempt finishes, success or failure; a started process already
/// holds the file open, so removal cannot precede the spawn.
pub(crate) async fn connect(
    host: &HostDescriptor,
    credential: &CredentialDescriptor,
    config: &BridgeConfig,
) -> Result<ExecStream, ConnectError> {
    let material = EphemeralMaterial::stage(credential).await?;
    let mut command = attach_command(host, material.path(), config);
    let spawned = spawn_stream(&mut command, config.event_capacity);
    material.remove().await;

    let stream = spawned?;
    tracing::info!(
        pod = %host.address,
        namespace = %host.namespace_or_default(),
        container = host.container.as_deref().unwrap_or("-"),
        "attach process started"
    );
    Ok(stream)
}

/// Build the attach command line for `host`.
fn attach_command(host: &HostDescriptor, kubeconfig: &Path, config: &BridgeConfig) -> Command {
    let mut command = Command::new(&config.attach_program);
    command
        .arg("--kubeconfig")
        .arg(kubeconfig)
        .args(["exec", "-i", "-t", "-n"])
        .arg(host.namespace_or_default())
        .arg(&host.address);
    if let Some(container) = &host.container {
        command.args(["-c", container.as_str()]);
    }
    command.arg("--").args(ATTACH_SHELL);
    command
}

/// Spawn `command` with piped stdio and wrap it in an [`ExecStream`].
pub(crate) fn spawn_stream(
    command: &mut Command,
    event_capacity: usize,
) -> Result<ExecStream, ConnectError> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ConnectError::spawn(e.to_string()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ConnectError::spawn("attach process has no stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ConnectError::spawn("attach process has no stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ConnectError::spawn("attach process has no stderr"))?;

    Ok(ExecStream::start(child, stdin, stdout, stderr, event_capacity))
}

/// An attached external process with merged output.
pub struct ExecStream {
    stdin: ChildStdin,
    output: mpsc::Receiver<io::Result<Bytes>>,
    pending: Bytes,
    eof: bool,
    kill: Option<oneshot::Sender<()>>,
    closed: bool,
}

impl ExecStream {
    fn start(
        child: Child,
        stdin: ChildStdin,
        stdout: ChildStdout,
        stderr: ChildStderr,
        event_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(event_capacity);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(drain(child, stdout, stderr, tx, kill_rx));

        Self {
            stdin,
            output: rx,
            pending: Bytes::new(),
            eof: false,
            kill: Some(kill_tx),
            closed: false,
        }
    }
}

impl std::fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecStream")
            .field("pending", &self.pending.len())
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Drain stdout and stderr into the output queue, then classify the exit.
///
/// Owning the child here keeps kill/wait in one place: the stream's shutdown
/// (or its drop) fires the kill signal, and the child is always reaped.
async fn drain(
    mut child: Child,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
    output: mpsc::Sender<io::Result<Bytes>>,
    mut kill: oneshot::Receiver<()>,
) {
    let mut out_buf = vec![0u8; 4096];
    let mut err_buf = vec![0u8; 4096];
    let mut out_open = true;
    let mut err_open = true;
    let mut killed = false;

    while out_open || err_open {
        tokio::select! {
            // Fires on an explicit close and when the stream is dropped.
            _ = &mut kill, if !killed => {
                killed = true;
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "attach process already gone");
                }
            }
            read = stdout.read(&mut out_buf), if out_open => match read {
                Ok(0) => out_open = false,
                Ok(n) => {
                    if output.send(Ok(Bytes::copy_from_slice(&out_buf[..n]))).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = output.send(Err(e)).await;
                    out_open = false;
                }
            },
            read = stderr.read(&mut err_buf), if err_open => match read {
                Ok(0) => err_open = false,
                Ok(n) => {
                    if output.send(Ok(Bytes::copy_from_slice(&err_buf[..n]))).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = output.send(Err(e)).await;
                    err_open = false;
                }
            },
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            tracing::debug!("attach process exited cleanly");
        }
        Ok(status) => {
            let _ = output
                .send(Err(io::Error::other(format!(
                    "attach process exited with {status}"
                ))))
                .await;
        }
        Err(e) => {
            let _ = output.send(Err(e)).await;
        }
    }
}

impl AsyncRead for ExecStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending.is_empty() {
            let len = std::cmp::min(buf.remaining(), this.pending.len());
            buf.put_slice(&this.pending.split_to(len));
            return Poll::Ready(Ok(()));
        }

        if this.eof {
            return Poll::Ready(Ok(()));
        }

        match this.output.poll_recv(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                let len = std::cmp::min(buf.remaining(), bytes.len());
                buf.put_slice(&bytes[..len]);
                if len < bytes.len() {
                    this.pending = bytes.slice(len..);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(e))) => {
                this.eof = true;
                Poll::Ready(Err(e))
            }
            Poll::Ready(None) => {
                this.eof = true;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for ExecStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.closed {
            this.closed = true;
            if let Some(kill) = this.kill.take() {
                let _ = kill.send(());
            }
        }
        Pin::new(&mut this.stdin).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    use crate::config::BridgeConfig;
    use crate::types::HostDescriptor;

    fn args_of(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn attach_command_shape() {
        let host = HostDescriptor::pod(1, "web-0");
        let config = BridgeConfig::default();
        let command = attach_command(&host, Path::new("/tmp/kc.yaml"), &config);

        assert_eq!(command.as_std().get_program(), "kubectl");
        assert_eq!(
            args_of(&command),
            [
                "--kubeconfig",
                "/tmp/kc.yaml",
                "exec",
                "-i",
                "-t",
                "-n",
                "default",
                "web-0",
                "--",
                "/bin/bash",
                "-i",
            ]
        );
    }

    #[test]
    fn attach_command_with_namespace_and_container() {
        let host = HostDescriptor::pod(1, "web-0")
            .namespace("staging")
            .container("sidecar");
        let config = BridgeConfig::default().attach_program("/opt/bin/kubectl");
        let command = attach_command(&host, Path::new("/tmp/kc.yaml"), &config);

        assert_eq!(command.as_std().get_program(), "/opt/bin/kubectl");
        let args = args_of(&command);
        assert_eq!(args[6], "staging");
        assert_eq!(args[8], "-c");
        assert_eq!(args[9], "sidecar");
    }

    async fn read_until_eof(stream: &mut ExecStream) -> io::Result<Vec<u8>> {
        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
                .await
                .expect("read stalled")?;
            if n == 0 {
                return Ok(collected);
            }
            collected.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn clean_exit_is_eof() {
        let mut command = Command::new("sh");
        command.args(["-c", "printf hello; exit 0"]);
        let mut stream = spawn_stream(&mut command, 8).unwrap();

        let collected = read_until_eof(&mut stream).await.unwrap();
        assert_eq!(collected, b"hello");
    }

    #[tokio::test]
    async fn stderr_is_merged_into_the_stream() {
        let mut command = Command::new("sh");
        command.args(["-c", "printf oops >&2; exit 0"]);
        let mut stream = spawn_stream(&mut command, 8).unwrap();

        let collected = read_until_eof(&mut stream).await.unwrap();
        assert_eq!(collected, b"oops");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_read_error() {
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        let mut stream = spawn_stream(&mut command, 8).unwrap();

        let err = read_until_eof(&mut stream).await.unwrap_err();
        assert!(err.to_string().contains("exited"), "got: {err}");
    }

    #[tokio::test]
    async fn stdin_reaches_the_process() {
        let mut command = Command::new("cat");
        let mut stream = spawn_stream(&mut command, 8).unwrap();

        stream.write_all(b"ping\n").await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 64];
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("read stalled")
            .unwrap();
        assert_eq!(&buf[..n], b"ping\n");

        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let mut command = Command::new("/nonexistent/attach-program");
        let err = spawn_stream(&mut command, 8).unwrap_err();
        assert!(matches!(err, ConnectError::Spawn { .. }));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let mut command = Command::new("cat");
        let mut stream = spawn_stream(&mut command, 8).unwrap();

        stream.shutdown().await.unwrap();
        stream.shutdown().await.unwrap();
    }
}
