//! Protocol definitions for PLM communication.
//!
//! This module contains the pure, I/O free part of the protocol:
//! - Frame start/trailer bytes and echo matching
//! - Inbound message parsing into structured messages
//! - Outbound command frame builders

pub mod command;
pub mod frame;
pub mod message;
pub mod parser;

pub use command::CommandOpcode;
pub use frame::{ACK, EchoStatus, MESSAGE_START, NAK, encode as encode_frame, format_bytes, matches_echo};
pub use message::{Message, MessageType, Properties, PropertyKey};
pub use parser::{message_length, parse_message};
