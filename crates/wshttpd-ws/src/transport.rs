//! Byte-stream transport contract.
//!
//! The engine never touches sockets directly. A [`Transport`] delivers
//! arbitrary-sized chunks, accepts writes, and can be shut down. Bytes read
//! past the HTTP header block are handed to the connection as already
//! buffered data, so the transport itself keeps no unread state.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 8 * 1024;

/// A bidirectional byte stream.
#[async_trait]
pub trait Transport: Send {
    /// Read the next chunk. `Ok(None)` means the peer closed the stream.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no data.
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>>;

    /// Write all of `data`.
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Shut down the stream. Further reads return EOF.
    async fn shutdown(&mut self) -> io::Result<()>;

    /// Whether the stream is TLS-wrapped.
    fn is_encrypted(&self) -> bool {
        false
    }

    /// Remote address, if known.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// [`Transport`] over any tokio stream (TCP, TLS, in-memory duplex).
pub struct IoTransport<S> {
    stream: S,
    read_buf: BytesMut,
    encrypted: bool,
    peer: Option<SocketAddr>,
}

impl<S> IoTransport<S> {
    /// Wrap a stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            encrypted: false,
            peer: None,
        }
    }

    /// Mark the stream as TLS-wrapped.
    #[must_use]
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Record the remote address.
    #[must_use]
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

#[async_trait]
impl<S> Transport for IoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        self.read_buf.reserve(READ_CHUNK);
        let n = self.stream.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_buf.split().freeze()))
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}
