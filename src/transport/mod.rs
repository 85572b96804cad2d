//! Transport layer for PLM communication.
//!
//! A transport only knows how to open a byte stream to the controller;
//! framing and the echo protocol live in the bridge.

pub mod serial;
pub mod tcp;

#[cfg(test)]
pub(crate) mod mock;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Read half of an opened transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an opened transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Opens the underlying connection and returns its read and write halves.
    fn open(&self) -> BoxFuture<'_, Result<(BoxedReader, BoxedWriter)>>;

    /// Human readable description used in logs.
    fn describe(&self) -> String;
}

pub use serial::SerialTransport;
pub use tcp::TcpTransport;
