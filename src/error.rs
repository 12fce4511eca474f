//! Error types for the nodemcu library.

use thiserror::Error;

/// The main error type for nodemcu operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Download frame scanning error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The expected terminator never arrived before the stream ended.
    #[error("bad response: expected {expected:?}, got {actual:?}")]
    BadResponse { expected: String, actual: String },

    /// The device reported a runtime error or replied with malformed data.
    #[error("{message}: {response:?}")]
    Communication { message: String, response: String },

    /// The operation failed and removing the helper routine failed too.
    #[error("{source} (helper teardown also failed: {teardown})")]
    Teardown {
        source: Box<Error>,
        teardown: Box<Error>,
    },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// The background listener task ended without handing back the port.
    #[error("listener task lost the port")]
    ListenerLost,
}

impl Error {
    /// Creates a [`Error::Communication`] for a failed step.
    pub(crate) fn communication(message: impl Into<String>, response: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
            response: response.into(),
        }
    }
}

/// Download frame errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A data frame did not close before the scan buffer filled up.
    #[error("frame too large: {size} bytes exceeds scan buffer of {max}")]
    TooLarge { size: usize, max: usize },
}

/// Result type alias for nodemcu operations.
pub type Result<T> = std::result::Result<T, Error>;
