//! Chunked binary framing carried over the text channel.
//!
//! Download (device to host) chunks are wrapped in sentinel markers:
//! ```text
//! ┌──────────────────┬──────────────┬────────────────┐
//! │ ~~~DATA-START~~~ │  raw bytes   │ ~~~DATA-END~~~ │
//! │     16 bytes     │ ≤ 1024 bytes │    14 bytes    │
//! └──────────────────┴──────────────┴────────────────┘
//! ```
//! followed by the interpreter prompt once the file is exhausted.
//!
//! Upload (host to device) sends raw packets of [`UPLOAD_PACKET_SIZE`]
//! bytes; [`PacketPlan`] computes how the device-side helper is armed.

use bytes::{Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::command::PROMPT;

/// Marker preceding each download chunk.
pub const DATA_START: &[u8] = b"~~~DATA-START~~~";

/// Marker following each download chunk.
pub const DATA_END: &[u8] = b"~~~DATA-END~~~";

/// Payload bytes per download chunk.
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024;

/// Scan buffer size: one chunk plus both markers, with headroom.
pub const SCAN_BUFFER_SIZE: usize = 1100;

/// Payload bytes per upload packet.
pub const UPLOAD_PACKET_SIZE: usize = 250;

/// Returns true if `buffer` ends with `marker`.
#[must_use]
pub fn ends_with(buffer: &[u8], marker: &[u8]) -> bool {
    buffer.len() >= marker.len() && buffer[buffer.len() - marker.len()..] == *marker
}

/// Returns the index of the first occurrence of `marker` in `buffer`.
#[must_use]
pub fn index_of(buffer: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() {
        return Some(0);
    }
    buffer.windows(marker.len()).position(|w| w == marker)
}

/// Wraps one chunk in download markers.
#[must_use]
pub fn encode(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATA_START.len() + payload.len() + DATA_END.len());
    buf.extend_from_slice(DATA_START);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(DATA_END);
    buf.freeze()
}

/// Result of feeding one byte to a [`FrameScanner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// Nothing complete yet.
    Pending,
    /// A full chunk was extracted.
    Payload(Bytes),
    /// The interpreter prompt arrived outside a frame: transfer complete.
    Prompt,
}

/// Extracts download chunks from the byte stream, one byte at a time.
///
/// The prompt is only recognised between frames, so payload bytes that
/// happen to contain `"> "` do not end the transfer. Noise between frames
/// is kept in a rolling window that never exceeds the scan buffer.
#[derive(Debug)]
pub struct FrameScanner {
    buffer: BytesMut,
    /// Offset of the payload when a start marker has been seen.
    payload_start: Option<usize>,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScanner {
    /// Creates an empty scanner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(SCAN_BUFFER_SIZE),
            payload_start: None,
        }
    }

    /// Feeds one byte.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::TooLarge` if a frame does not close within the
    /// scan buffer.
    pub fn push(&mut self, byte: u8) -> Result<Scan, FrameError> {
        self.buffer.extend_from_slice(&[byte]);

        match self.payload_start {
            Some(start) => {
                if self.buffer.len() >= start + DATA_END.len() && ends_with(&self.buffer, DATA_END)
                {
                    let end = self.buffer.len() - DATA_END.len();
                    let payload = self.buffer.split_to(end).split_off(start).freeze();
                    self.clear();
                    return Ok(Scan::Payload(payload));
                }
                if self.buffer.len() >= SCAN_BUFFER_SIZE {
                    return Err(FrameError::TooLarge {
                        size: self.buffer.len(),
                        max: SCAN_BUFFER_SIZE,
                    });
                }
            }
            None => {
                if ends_with(&self.buffer, DATA_START) {
                    // Noise ahead of the marker does not count against the frame.
                    let noise = self.buffer.len() - DATA_START.len();
                    let _ = self.buffer.split_to(noise);
                    self.payload_start = Some(DATA_START.len());
                } else if ends_with(&self.buffer, PROMPT.as_bytes()) {
                    self.clear();
                    return Ok(Scan::Prompt);
                } else if self.buffer.len() >= SCAN_BUFFER_SIZE {
                    // Keep just enough to complete a marker that straddles the cut.
                    let keep = DATA_START.len() - 1;
                    let _ = self.buffer.split_to(self.buffer.len() - keep);
                }
            }
        }

        Ok(Scan::Pending)
    }

    /// Returns true while a start marker is waiting for its end marker.
    #[must_use]
    pub const fn in_frame(&self) -> bool {
        self.payload_start.is_some()
    }

    /// Returns the bytes currently held.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drops all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.payload_start = None;
    }
}

/// How an upload is split into packets for the device-side helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketPlan {
    /// Total number of packets, including a short final one.
    pub count: usize,
    /// Size of the packets the helper is first armed with.
    pub start_size: usize,
    /// Size of the short final packet, or 0 when all packets are full.
    pub remainder: usize,
}

impl PacketPlan {
    /// Plans an upload of `size` bytes using [`UPLOAD_PACKET_SIZE`] packets.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self::with_packet_size(size, UPLOAD_PACKET_SIZE)
    }

    /// Plans an upload of `size` bytes in packets of `packet_size`.
    ///
    /// A single packet upload carries no separate final packet when it is
    /// exactly `packet_size` long.
    #[must_use]
    pub const fn with_packet_size(size: usize, packet_size: usize) -> Self {
        let remainder = size % packet_size;
        if size > packet_size {
            let mut count = size / packet_size;
            if remainder > 0 {
                count += 1;
            }
            Self {
                count,
                start_size: packet_size,
                remainder,
            }
        } else {
            Self {
                count: 1,
                start_size: size,
                remainder,
            }
        }
    }
}

/// Integer percentage of `done` over `total`, capped at 100.
#[must_use]
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from((done.saturating_mul(100) / total).min(100)).unwrap_or(100)
}
