//! Error types for the insteon library.

use thiserror::Error;

use crate::protocol::EchoStatus;

/// The main error type for insteon operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Unexpected or malformed data from the controller.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The controller did not answer the identification handshake.
    #[error("unable to negotiate with INSTEON controller: {message}")]
    Negotiation { message: String },

    /// Timed out waiting for a response.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// The controller did not acknowledge a frame.
    #[error("failed to send message '{frame}': {status}")]
    SendFailed { frame: String, status: EchoStatus },

    /// Rejected argument combination.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Unparseable device address.
    #[error("invalid address: '{input}'")]
    InvalidAddress { input: String },

    /// Unparseable connection descriptor.
    #[error("invalid connection string: '{input}'")]
    InvalidConnection { input: String },
}

impl Error {
    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Frame-specific errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The command byte following `0x02` is not a known inbound message.
    #[error("unknown message command byte 0x{0:02X}")]
    UnknownCommand(u8),
}

/// Result type alias for insteon operations.
pub type Result<T> = std::result::Result<T, Error>;
