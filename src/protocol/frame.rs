//! Frame boundaries and echo matching for the PLM serial protocol.
//!
//! Every frame starts with a start byte. Frames the host sends come back as
//! an echo followed by a one byte trailer:
//! ```text
//! ┌──────────┬───────────┬────────────────┬──────────────┐
//! │  0x02    │  command  │    payload     │ 0x06 / 0x15  │
//! │  1 byte  │  1 byte   │  fixed length  │ (echo only)  │
//! └──────────┴───────────┴────────────────┴──────────────┘
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Start of every frame.
pub const MESSAGE_START: u8 = 0x02;

/// Echo trailer: accepted.
pub const ACK: u8 = 0x06;

/// Echo trailer: rejected, the controller is busy.
pub const NAK: u8 = 0x15;

/// Outcome of sending a frame to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EchoStatus {
    /// Nothing was read back.
    None,
    /// Echo matched and was accepted.
    Ack,
    /// The controller rejected the frame.
    Nak,
    /// Echo missing, mismatched, or followed by an unexpected trailer.
    Unknown,
}

impl fmt::Display for EchoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "no response",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl EchoStatus {
    /// Maps an echo trailer byte to a status.
    #[must_use]
    pub const fn from_trailer(byte: u8) -> Self {
        match byte {
            ACK => Self::Ack,
            NAK => Self::Nak,
            _ => Self::Unknown,
        }
    }
}

/// Prefixes a message with the start byte.
#[must_use]
pub fn encode(message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + message.len());
    buf.put_u8(MESSAGE_START);
    buf.put_slice(message);
    buf.freeze()
}

/// Compares a previously sent frame (including its start byte) against
/// `buffer` at `offset`.
///
/// Returns the matched length on success.
#[must_use]
pub fn matches_echo(sent: &[u8], buffer: &[u8], offset: usize) -> Option<usize> {
    let end = offset.checked_add(sent.len())?;
    (buffer.get(offset..end)? == sent).then_some(sent.len())
}

/// Formats bytes for logs, e.g. `02 62 1A 2B 3C`.
#[must_use]
pub fn format_bytes(data: &[u8]) -> String {
    let hex = hex::encode_upper(data);
    let mut out = String::with_capacity(hex.len() + data.len());
    for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(char::from(pair[0]));
        out.push(char::from(pair[1]));
    }
    out
}
