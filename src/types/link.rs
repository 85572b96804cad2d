//! Controller link database records.

use crate::protocol::{Properties, PropertyKey};
use crate::types::Address;

/// One entry of the controller's ALL-Link database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRecord {
    /// Raw record flags.
    pub flags: u8,
    /// Group number.
    pub group: u8,
    /// Linked device address.
    pub address: Address,
    /// Link data bytes (device specific).
    pub data: [u8; 3],
}

impl LinkRecord {
    /// Record is in use.
    pub const FLAG_IN_USE: u8 = 0x80;
    /// Controller is the controller side of the link.
    pub const FLAG_CONTROLLER: u8 = 0x40;

    /// Builds a record from the properties of an ALL-Link record message.
    ///
    /// Missing properties read as zero.
    #[must_use]
    pub fn from_properties(properties: &Properties) -> Self {
        let byte = |key| properties.get(&key).map_or(0, |&v| v as u8);
        Self {
            flags: byte(PropertyKey::LinkRecordFlags),
            group: byte(PropertyKey::LinkGroup),
            address: Address::new(properties.get(&PropertyKey::LinkAddress).copied().unwrap_or(0)),
            data: [
                byte(PropertyKey::LinkData1),
                byte(PropertyKey::LinkData2),
                byte(PropertyKey::LinkData3),
            ],
        }
    }

    /// Returns true if the record is in use.
    #[must_use]
    pub const fn in_use(&self) -> bool {
        self.flags & Self::FLAG_IN_USE != 0
    }

    /// Returns true if the controller is the controller of this link.
    #[must_use]
    pub const fn is_controller(&self) -> bool {
        self.flags & Self::FLAG_CONTROLLER != 0
    }
}
