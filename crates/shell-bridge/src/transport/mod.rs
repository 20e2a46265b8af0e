//! Transport adapters.
//!
//! A transport is the byte-level connection to the target: an SSH shell
//! channel for bare-metal hosts, an attached exec process for pods. Both
//! variants expose plain async I/O; the bridge splits the boxed transport so
//! that the inbound pump owns the only reader and the outbound relay the only
//! writer. `poll_shutdown` carries the adapter's close semantics and is
//! idempotent.

pub mod exec;
pub mod ssh;

use tokio::io::{AsyncRead, AsyncWrite};

/// Byte-level read/write access to a connected target.
///
/// EOF (a zero-length read) means the remote side ended cleanly; read errors
/// are classified by the bridge as stream failures.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A type-erased transport, exactly one per session.
pub type BoxedTransport = Box<dyn Transport>;
