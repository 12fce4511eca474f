//! In-memory transport used by the test suite.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use crate::error::Result;
use crate::transport::Transport;

/// Capacity of the in-memory pipe in each direction.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A control line change observed by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineChange {
    Dtr(bool),
    Rts(bool),
}

/// Side effects recorded by [`MockTransport`].
#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub baud_rate: Option<u32>,
    pub lines: Vec<LineChange>,
    pub clears: usize,
}

/// Transport backed by a `tokio::io::duplex` pipe.
pub(crate) struct MockTransport {
    io: DuplexStream,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a transport and the device end of its pipe.
    pub(crate) fn pair() -> (Self, DuplexStream) {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let transport = Self {
            io: host,
            state: Arc::new(Mutex::new(MockState::default())),
        };
        (transport, device)
    }

    /// Shared view of the recorded side effects.
    pub(crate) fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    pub(crate) fn clears(&self) -> usize {
        self.state.lock().unwrap().clears
    }
}

impl Transport for MockTransport {
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.state.lock().unwrap().baud_rate = Some(baud_rate);
        Ok(())
    }

    fn write_data_terminal_ready(&mut self, level: bool) -> Result<()> {
        self.state.lock().unwrap().lines.push(LineChange::Dtr(level));
        Ok(())
    }

    fn write_request_to_send(&mut self, level: bool) -> Result<()> {
        self.state.lock().unwrap().lines.push(LineChange::Rts(level));
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.state.lock().unwrap().clears += 1;
        Ok(())
    }
}

impl AsyncRead for MockTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
