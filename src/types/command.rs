//! Device and group command codes, link modes and device status values.

use std::fmt;

/// Commands sent directly to a device (`cmd1` of a standard message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceCommand {
    /// Put the device into linking mode for a group.
    EnterLinkingMode = 0x09,
    /// Put the device into unlinking mode for a group.
    EnterUnlinkingMode = 0x0A,
    /// Ask the device to broadcast its identity.
    IdRequest = 0x10,
    /// Turn on, to the level in `cmd2`.
    On = 0x11,
    /// Turn fully on immediately.
    FastOn = 0x12,
    /// Turn off.
    Off = 0x13,
    /// Turn off immediately.
    FastOff = 0x14,
    /// Brighten one step.
    Brighten = 0x15,
    /// Dim one step.
    Dim = 0x16,
    /// Begin a manual level change.
    StartDimming = 0x17,
    /// End a manual level change.
    StopDimming = 0x18,
    /// Request the current on-level.
    StatusRequest = 0x19,
}

impl DeviceCommand {
    /// Looks up a command from its code.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x09 => Some(Self::EnterLinkingMode),
            0x0A => Some(Self::EnterUnlinkingMode),
            0x10 => Some(Self::IdRequest),
            0x11 => Some(Self::On),
            0x12 => Some(Self::FastOn),
            0x13 => Some(Self::Off),
            0x14 => Some(Self::FastOff),
            0x15 => Some(Self::Brighten),
            0x16 => Some(Self::Dim),
            0x17 => Some(Self::StartDimming),
            0x18 => Some(Self::StopDimming),
            0x19 => Some(Self::StatusRequest),
            _ => None,
        }
    }

    /// Default `cmd2` value: full level for `On`, zero otherwise.
    #[must_use]
    pub const fn default_value(self) -> u8 {
        match self {
            Self::On => 0xFF,
            _ => 0x00,
        }
    }
}

impl From<DeviceCommand> for u8 {
    fn from(cmd: DeviceCommand) -> Self {
        cmd as Self
    }
}

/// Commands broadcast by the controller to every device in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GroupCommand {
    /// Turn the group on.
    On = 0x11,
    /// Turn the group fully on immediately.
    FastOn = 0x12,
    /// Turn the group off.
    Off = 0x13,
    /// Turn the group off immediately.
    FastOff = 0x14,
    /// Brighten the group one step.
    Brighten = 0x15,
    /// Dim the group one step.
    Dim = 0x16,
    /// Begin a manual level change.
    StartDimming = 0x17,
    /// End a manual level change; requires a value.
    StopDimming = 0x18,
}

impl GroupCommand {
    /// Returns true if the command needs an explicit value parameter.
    #[must_use]
    pub const fn requires_value(self) -> bool {
        matches!(self, Self::StopDimming)
    }
}

impl From<GroupCommand> for u8 {
    fn from(cmd: GroupCommand) -> Self {
        cmd as Self
    }
}

/// Controller linking modes (the mode byte of the enter-link-mode frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkMode {
    /// The controller becomes a responder of the device.
    Responder = 0x00,
    /// The controller becomes a controller of the device.
    Controller = 0x01,
    /// Whichever role the device chooses.
    Either = 0x03,
    /// Remove the link.
    Delete = 0xFF,
}

impl From<LinkMode> for u8 {
    fn from(mode: LinkMode) -> Self {
        mode as Self
    }
}

/// Status reported for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    /// Turned on.
    On,
    /// Turned off.
    Off,
    /// Turned fully on immediately.
    FastOn,
    /// Turned off immediately.
    FastOff,
    /// Brightened.
    Brighten,
    /// Dimmed.
    Dim,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::On => "On",
            Self::Off => "Off",
            Self::FastOn => "Fast On",
            Self::FastOff => "Fast Off",
            Self::Brighten => "Brighten",
            Self::Dim => "Dim",
        };
        f.write_str(name)
    }
}
