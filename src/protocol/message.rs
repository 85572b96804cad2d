//! Structured view of an inbound INSTEON message.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::Address;

/// Keys of the property map carried by a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    /// Address of the device that sent a standard/extended message.
    FromAddress,
    /// Destination address of a standard/extended message.
    ToAddress,
    /// Address of a device in a link-complete or cleanup-failure report.
    Address,
    /// Group number.
    Group,
    /// Device category.
    DevCat,
    /// Device sub-category.
    SubCat,
    /// Firmware version.
    FirmwareVersion,
    /// Raw message flags.
    MessageFlags,
    /// Extended message bit.
    MessageFlagsExtended,
    /// Remaining hops.
    MessageFlagsRemainingHops,
    /// Maximum hops.
    MessageFlagsMaxHops,
    /// Command byte 1.
    Cmd1,
    /// Command byte 2.
    Cmd2,
    /// Dimmer direction at the start of a long press (non-zero = up).
    IncrementDirection,
    /// Link code of a link-complete report.
    LinkCode,
    /// Flags of a link database record.
    LinkRecordFlags,
    /// Group of a link database record.
    LinkGroup,
    /// Address of a link database record.
    LinkAddress,
    /// Link data byte 1.
    LinkData1,
    /// Link data byte 2.
    LinkData2,
    /// Link data byte 3.
    LinkData3,
    /// Button event code.
    ButtonEvent,
    /// Raw X10 byte.
    X10RawX10,
    /// X10 flag byte.
    X10Flag,
    /// ALL-Link cleanup status (ACK or NAK byte).
    CleanupStatus,
}

/// Property map of a message; values are at most 24 bits wide.
pub type Properties = BTreeMap<PropertyKey, u32>;

/// Classification of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Direct acknowledgement from a device.
    Ack,
    /// Direct negative acknowledgement from a device.
    Nak,
    /// Set button pressed identification broadcast.
    SetButtonPressed,
    /// Group broadcast: on.
    OnBroadcast,
    /// Group broadcast: off.
    OffBroadcast,
    /// Group broadcast: fast on.
    FastOnBroadcast,
    /// Group broadcast: fast off.
    FastOffBroadcast,
    /// Group broadcast: start of a dimmer long press.
    IncrementBeginBroadcast,
    /// Group broadcast: end of a dimmer long press.
    IncrementEndBroadcast,
    /// Group cleanup: on.
    OnCleanup,
    /// Group cleanup: off.
    OffCleanup,
    /// Group cleanup: fast on.
    FastOnCleanup,
    /// Group cleanup: fast off.
    FastOffCleanup,
    /// Any other standard message.
    Standard,
    /// Extended message (framing only).
    Extended,
    /// X10 message received.
    X10Received,
    /// ALL-Link complete: a device was linked or unlinked.
    DeviceLink,
    /// Controller button event.
    ButtonEvent,
    /// Controller was factory reset.
    UserReset,
    /// ALL-Link cleanup failure report.
    LinkCleanupFailure,
    /// ALL-Link database record.
    LinkRecord,
    /// ALL-Link cleanup status report.
    LinkCleanupStatus,
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Command byte that introduced the message (e.g. `0x50`).
    pub message_id: u8,
    /// Message classification.
    pub message_type: MessageType,
    /// Extracted fields.
    pub properties: Properties,
}

impl Message {
    /// Returns a property value.
    #[must_use]
    pub fn get(&self, key: PropertyKey) -> Option<u32> {
        self.properties.get(&key).copied()
    }

    /// Returns a property value truncated to a byte.
    #[must_use]
    pub fn byte(&self, key: PropertyKey) -> Option<u8> {
        self.get(key).map(|v| v as u8)
    }

    /// Returns the sending device address, if the message has one.
    #[must_use]
    pub fn from_address(&self) -> Option<Address> {
        self.get(PropertyKey::FromAddress).map(Address::new)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.message_type)?;
        for (key, value) in &self.properties {
            if matches!(
                key,
                PropertyKey::MessageFlagsRemainingHops | PropertyKey::MessageFlagsMaxHops
            ) {
                continue;
            }
            if *value > 0xFFFF {
                write!(f, " {key:?}={value:06X}")?;
            } else if *value > 0xFF {
                write!(f, " {key:?}={value:04X}")?;
            } else {
                write!(f, " {key:?}={value:02X}")?;
            }
        }
        Ok(())
    }
}
