//! Device addressing and identity.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A 24-bit INSTEON device address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u32);

impl Address {
    /// Creates an address from its integer value; bits above 24 are dropped.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    /// Creates an address from its wire order bytes (high, middle, low).
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32)
    }

    /// Returns the wire order bytes (high, middle, low).
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }

    /// Returns the integer value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [hi, mid, lo] = self.to_bytes();
        write!(f, "{hi:02X}.{mid:02X}.{lo:02X}")
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses `"1A.2B.3C"` or `"1A2B3C"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidAddress {
            input: s.to_string(),
        };
        let digits: String = s.trim().chars().filter(|&c| c != '.').collect();
        let bytes = hex::decode(&digits).map_err(|_| invalid())?;
        let bytes: [u8; 3] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self::from_bytes(bytes))
    }
}

impl From<[u8; 3]> for Address {
    fn from(bytes: [u8; 3]) -> Self {
        Self::from_bytes(bytes)
    }
}

/// Device category, sub-category and firmware version of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Identity {
    /// Device category.
    pub dev_cat: u8,
    /// Device sub-category.
    pub sub_cat: u8,
    /// Firmware version.
    pub firmware_version: u8,
}

impl Identity {
    /// An identity that has not been reported yet.
    pub const EMPTY: Self = Self::new(0, 0, 0);

    /// Creates a new identity.
    #[must_use]
    pub const fn new(dev_cat: u8, sub_cat: u8, firmware_version: u8) -> Self {
        Self {
            dev_cat,
            sub_cat,
            firmware_version,
        }
    }

    /// Returns true if the device has not been identified.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.dev_cat == 0 && self.sub_cat == 0 && self.firmware_version == 0
    }
}
