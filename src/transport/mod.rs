//! Transport layer for NodeMCU communication.
//!
//! A transport is a duplex byte stream with a configurable baud rate and
//! two hardware control lines. [`Port`] wraps a transport together with
//! its read-ahead buffer and the per-byte read deadline used by the
//! protocol layer.

#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Size of a single read from the underlying stream.
const READ_CHUNK_SIZE: usize = 1024;

/// Trait for transport implementations.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Reconfigures the local baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Drives the DTR control line.
    fn write_data_terminal_ready(&mut self, level: bool) -> Result<()>;

    /// Drives the RTS control line.
    fn write_request_to_send(&mut self, level: bool) -> Result<()>;

    /// Discards pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;
}

pub use serial::{SerialConfig, list_ports};

/// Exclusive handle on an open transport.
///
/// Bytes read ahead of the protocol are kept in `pending` so nothing is lost
/// when the port moves between the listener and a scripted exchange.
pub struct Port<T> {
    io: T,
    pending: BytesMut,
}

impl<T: Transport> Port<T> {
    /// Wraps an open transport.
    #[must_use]
    pub fn new(io: T) -> Self {
        Self {
            io,
            pending: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Reads a single byte.
    ///
    /// Returns `Ok(None)` on end-of-stream or when `deadline` elapses
    /// without data.
    pub async fn read_byte(&mut self, deadline: Duration) -> Result<Option<u8>> {
        if self.pending.is_empty() && !self.fill(deadline).await? {
            return Ok(None);
        }
        Ok(Some(self.pending.get_u8()))
    }

    /// Reads whatever is available into the pending buffer.
    async fn fill(&mut self, deadline: Duration) -> Result<bool> {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        match tokio::time::timeout(deadline, self.io.read(&mut buf)).await {
            Ok(Ok(0)) => {
                tracing::debug!("transport reached end of stream");
                Ok(false)
            }
            Ok(Ok(n)) => {
                tracing::trace!("read {} bytes", n);
                self.pending.extend_from_slice(&buf[..n]);
                Ok(true)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(false),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::debug!("read deadline of {:?} elapsed", deadline);
                Ok(false)
            }
        }
    }

    /// Reads whatever the transport has next, waiting without a deadline.
    ///
    /// Returns 0 on end-of-stream. Cancel safe.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.io.read(buf).await?)
    }

    /// Writes raw bytes and flushes.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        tracing::trace!("writing {} bytes", data.len());
        self.io.write_all(data).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Writes a line terminated by `\n`.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        tracing::debug!("write: {}", line);
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write_all(&data).await
    }

    /// Discards buffered input and output on both sides.
    pub fn clear(&mut self) -> Result<()> {
        self.pending.clear();
        self.io.clear_buffers()
    }

    /// Takes any bytes read ahead but not yet consumed.
    pub fn take_pending(&mut self) -> BytesMut {
        self.pending.split()
    }

    /// Returns the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

}
