//! Data types for INSTEON entities.
//!
//! This module contains the value types shared across the engine:
//! - Addresses and device identities
//! - Connection descriptors
//! - Command codes, link modes and device status values
//! - Link database records

pub mod address;
pub mod command;
pub mod connection;
pub mod link;

pub use address::{Address, Identity};
pub use command::{DeviceCommand, DeviceStatus, GroupCommand, LinkMode};
pub use connection::{ConnectionDescriptor, ConnectionKind};
pub use link::LinkRecord;
