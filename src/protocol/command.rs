//! Outbound command frames sent to the controller.
//!
//! Builders return the frame without its start byte; the bridge adds it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{Address, DeviceCommand, GroupCommand, LinkMode};

/// Message flags used for direct standard messages (max hops 3, 3 remaining).
pub const DIRECT_FLAGS: u8 = 0x0F;

/// Command opcodes sent to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandOpcode {
    /// Get controller identity.
    GetImInfo = 0x60,
    /// Send a group command.
    SendGroupCommand = 0x61,
    /// Send a standard or extended message.
    SendMessage = 0x62,
    /// Start ALL-Linking.
    StartLinking = 0x64,
    /// Cancel ALL-Linking.
    CancelLinking = 0x65,
    /// Get the first ALL-Link record.
    GetFirstLink = 0x69,
    /// Get the next ALL-Link record.
    GetNextLink = 0x6A,
}

impl From<CommandOpcode> for u8 {
    fn from(cmd: CommandOpcode) -> Self {
        cmd as Self
    }
}

/// Builds a direct standard message to a device:
/// `0x62 <addr:3> <flags> <cmd1> <cmd2>`.
#[must_use]
pub fn device_command(address: Address, command: DeviceCommand, value: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(7);
    buf.put_u8(CommandOpcode::SendMessage.into());
    buf.put_slice(&address.to_bytes());
    buf.put_u8(DIRECT_FLAGS);
    buf.put_u8(command.into());
    buf.put_u8(value);
    buf.freeze()
}

/// Builds a controller group command: `0x61 <group> <cmd> <value>`.
#[must_use]
pub fn group_command(command: GroupCommand, group: u8, value: u8) -> Bytes {
    Bytes::from(vec![
        CommandOpcode::SendGroupCommand.into(),
        group,
        command.into(),
        value,
    ])
}

/// Builds the enter-link-mode frame: `0x64 <mode> <group>`.
#[must_use]
pub fn enter_link_mode(mode: LinkMode, group: u8) -> Bytes {
    Bytes::from(vec![CommandOpcode::StartLinking.into(), mode.into(), group])
}

/// Builds the cancel-link-mode frame.
#[must_use]
pub fn cancel_link_mode() -> Bytes {
    Bytes::from_static(&[CommandOpcode::CancelLinking as u8])
}

/// Builds the get-first-link frame.
#[must_use]
pub fn get_first_link() -> Bytes {
    Bytes::from_static(&[CommandOpcode::GetFirstLink as u8])
}

/// Builds the get-next-link frame.
#[must_use]
pub fn get_next_link() -> Bytes {
    Bytes::from_static(&[CommandOpcode::GetNextLink as u8])
}
