//! # insteon
//!
//! An async engine for INSTEON powerline modems (PLMs).
//!
//! The library talks to a PLM over a serial port or a TCP bridge, tracks
//! the echo/ACK protocol of every frame it sends, and turns the modem's
//! inbound messages into typed events.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Frame codec for the PLM's inbound and outbound messages
//! - Linking, link table enumeration and group commands on the controller
//! - Per-device command tracking with acknowledgement timeouts and retries
//! - Broadcast events for connection, linking and device status changes
//!
//! ## Quick Start
//!
//! ```no_run
//! use insteon::{Config, ConnectionDescriptor, DeviceCommand, Event, LinkMode, Network};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), insteon::Error> {
//!     let mut network = Network::new(Config::default());
//!     let mut events = network.subscribe();
//!     let descriptor: ConnectionDescriptor = "Serial: /dev/ttyUSB0".parse()?;
//!     network.connect(&descriptor).await?;
//!
//!     // Press the set button on a device within the link timeout.
//!     network.controller()?.enter_link_mode(LinkMode::Controller, 0).await?;
//!     while let Some(event) = events.recv().await {
//!         if let Event::DeviceLinked { address, .. } = event {
//!             let device = network.device(address).ok_or(insteon::Error::NotConnected)?;
//!             device.command(DeviceCommand::On, 0xFF).await?;
//!             break;
//!         }
//!     }
//!
//!     network.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Frame constants, message parsing and command builders
//! - [`types`] - Addresses, identities, command codes, link records
//! - [`transport`] - Serial and TCP byte streams
//! - [`event`] - Async event system for notifications
//! - [`Network`] - Session owner handing out the [`Controller`] and [`Device`]s

mod bridge;
pub mod config;
mod controller;
mod device;
pub mod error;
pub mod event;
mod messenger;
mod network;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use controller::Controller;
pub use device::Device;
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use network::Network;
pub use protocol::{EchoStatus, Message, MessageType, Properties, PropertyKey};
pub use transport::{SerialTransport, TcpTransport, Transport};
pub use types::{
    Address, ConnectionDescriptor, ConnectionKind, DeviceCommand, DeviceStatus, GroupCommand,
    Identity, LinkMode, LinkRecord,
};
