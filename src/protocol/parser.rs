//! Parsing of inbound PLM messages into [`Message`] values.
//!
//! The caller has already consumed the start byte; parsing begins at the
//! command byte and the reported length counts the command byte.

use bytes::Buf;

use crate::error::FrameError;
use crate::protocol::message::{Message, MessageType, Properties, PropertyKey};

/// Standard message received.
pub const STANDARD_MESSAGE: u8 = 0x50;
/// Extended message received.
pub const EXTENDED_MESSAGE: u8 = 0x51;
/// X10 message received.
pub const X10_RECEIVED: u8 = 0x52;
/// ALL-Link complete.
pub const LINK_COMPLETE: u8 = 0x53;
/// Button event report.
pub const BUTTON_EVENT: u8 = 0x54;
/// User reset detected.
pub const USER_RESET: u8 = 0x55;
/// ALL-Link cleanup failure report.
pub const LINK_CLEANUP_FAILURE: u8 = 0x56;
/// ALL-Link record response.
pub const LINK_RECORD: u8 = 0x57;
/// ALL-Link cleanup status report.
pub const LINK_CLEANUP_STATUS: u8 = 0x58;

// Message classes in the top three bits of the flags byte.
const CLASS_MASK: u8 = 0xE0;
const CLASS_DIRECT_ACK: u8 = 0x20;
const CLASS_GROUP_CLEANUP: u8 = 0x40;
const CLASS_BROADCAST: u8 = 0x80;
const CLASS_DIRECT_NAK: u8 = 0xA0;
const CLASS_GROUP_BROADCAST: u8 = 0xC0;

/// Returns the total length (command byte included) of an inbound message.
#[must_use]
pub const fn message_length(command: u8) -> Option<usize> {
    match command {
        STANDARD_MESSAGE => Some(10),
        EXTENDED_MESSAGE => Some(24),
        X10_RECEIVED => Some(3),
        LINK_COMPLETE | LINK_RECORD => Some(9),
        BUTTON_EVENT | LINK_CLEANUP_STATUS => Some(2),
        USER_RESET => Some(1),
        LINK_CLEANUP_FAILURE => Some(6),
        _ => None,
    }
}

/// Parses the message whose command byte is at `buffer[offset]`.
///
/// Returns `Ok(None)` when the buffer does not yet hold the whole message;
/// the caller should read more data and retry at the same offset.
/// On success returns the message and the number of bytes it occupies.
///
/// # Errors
///
/// Returns [`FrameError::UnknownCommand`] for command bytes that do not
/// start a known inbound message.
pub fn parse_message(buffer: &[u8], offset: usize) -> Result<Option<(Message, usize)>, FrameError> {
    let Some(&command) = buffer.get(offset) else {
        return Ok(None);
    };
    let length = message_length(command).ok_or(FrameError::UnknownCommand(command))?;
    let Some(data) = buffer.get(offset..offset + length) else {
        return Ok(None);
    };

    let mut cursor = &data[1..];
    let mut properties = Properties::new();

    let message_type = match command {
        STANDARD_MESSAGE | EXTENDED_MESSAGE => parse_standard(&mut cursor, &mut properties),
        X10_RECEIVED => {
            properties.insert(PropertyKey::X10RawX10, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::X10Flag, u32::from(cursor.get_u8()));
            MessageType::X10Received
        }
        LINK_COMPLETE => {
            properties.insert(PropertyKey::LinkCode, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::Group, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::Address, cursor.get_uint(3) as u32);
            properties.insert(PropertyKey::DevCat, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::SubCat, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::FirmwareVersion, u32::from(cursor.get_u8()));
            MessageType::DeviceLink
        }
        BUTTON_EVENT => {
            properties.insert(PropertyKey::ButtonEvent, u32::from(cursor.get_u8()));
            MessageType::ButtonEvent
        }
        USER_RESET => MessageType::UserReset,
        LINK_CLEANUP_FAILURE => {
            cursor.advance(1);
            properties.insert(PropertyKey::Group, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::Address, cursor.get_uint(3) as u32);
            MessageType::LinkCleanupFailure
        }
        LINK_RECORD => {
            properties.insert(PropertyKey::LinkRecordFlags, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::LinkGroup, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::LinkAddress, cursor.get_uint(3) as u32);
            properties.insert(PropertyKey::LinkData1, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::LinkData2, u32::from(cursor.get_u8()));
            properties.insert(PropertyKey::LinkData3, u32::from(cursor.get_u8()));
            MessageType::LinkRecord
        }
        LINK_CLEANUP_STATUS => {
            properties.insert(PropertyKey::CleanupStatus, u32::from(cursor.get_u8()));
            MessageType::LinkCleanupStatus
        }
        _ => return Err(FrameError::UnknownCommand(command)),
    };

    let message = Message {
        message_id: command,
        message_type,
        properties,
    };
    Ok(Some((message, length)))
}

/// Parses the common part of standard and extended messages.
///
/// Format:
/// ```text
/// [from:3] [to:3] [flags:1] [cmd1:1] [cmd2:1] (extended: [user data:14])
/// ```
fn parse_standard(cursor: &mut &[u8], properties: &mut Properties) -> MessageType {
    let from = cursor.get_uint(3) as u32;
    let to = [cursor.get_u8(), cursor.get_u8(), cursor.get_u8()];
    let flags = cursor.get_u8();
    let cmd1 = cursor.get_u8();
    let cmd2 = cursor.get_u8();

    properties.insert(PropertyKey::FromAddress, from);
    properties.insert(PropertyKey::MessageFlags, u32::from(flags));
    properties.insert(PropertyKey::MessageFlagsExtended, u32::from((flags >> 4) & 0x01));
    properties.insert(PropertyKey::MessageFlagsRemainingHops, u32::from((flags >> 2) & 0x03));
    properties.insert(PropertyKey::MessageFlagsMaxHops, u32::from(flags & 0x03));
    properties.insert(PropertyKey::Cmd1, u32::from(cmd1));
    properties.insert(PropertyKey::Cmd2, u32::from(cmd2));

    if flags & 0x10 != 0 {
        return MessageType::Extended;
    }

    match flags & CLASS_MASK {
        CLASS_BROADCAST if matches!(cmd1, 0x01 | 0x02) => {
            // The to-address of an identification broadcast carries the identity.
            properties.insert(PropertyKey::DevCat, u32::from(to[0]));
            properties.insert(PropertyKey::SubCat, u32::from(to[1]));
            properties.insert(PropertyKey::FirmwareVersion, u32::from(to[2]));
            MessageType::SetButtonPressed
        }
        CLASS_GROUP_BROADCAST => {
            properties.insert(PropertyKey::Group, u32::from(to[2]));
            match cmd1 {
                0x11 => MessageType::OnBroadcast,
                0x12 => MessageType::FastOnBroadcast,
                0x13 => MessageType::OffBroadcast,
                0x14 => MessageType::FastOffBroadcast,
                0x17 => {
                    properties.insert(PropertyKey::IncrementDirection, u32::from(cmd2));
                    MessageType::IncrementBeginBroadcast
                }
                0x18 => MessageType::IncrementEndBroadcast,
                _ => MessageType::Standard,
            }
        }
        CLASS_GROUP_CLEANUP => {
            properties.insert(PropertyKey::ToAddress, u32::from_be_bytes([0, to[0], to[1], to[2]]));
            properties.insert(PropertyKey::Group, u32::from(cmd2));
            match cmd1 {
                0x11 => MessageType::OnCleanup,
                0x12 => MessageType::FastOnCleanup,
                0x13 => MessageType::OffCleanup,
                0x14 => MessageType::FastOffCleanup,
                _ => MessageType::Standard,
            }
        }
        class => {
            properties.insert(PropertyKey::ToAddress, u32::from_be_bytes([0, to[0], to[1], to[2]]));
            match class {
                CLASS_DIRECT_ACK => MessageType::Ack,
                CLASS_DIRECT_NAK => MessageType::Nak,
                _ => MessageType::Standard,
            }
        }
    }
}
