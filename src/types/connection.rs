//! Connection descriptors.
//!
//! A descriptor names the physical route to the controller and has a
//! single-line text form:
//! ```text
//! <Net|Serial>: <value>[, <name>]
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::transport::{SerialTransport, TcpTransport, Transport};

/// Kind of physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// TCP connection to a network attached controller.
    Net,
    /// Local serial port.
    Serial,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net => f.write_str("Net"),
            Self::Serial => f.write_str("Serial"),
        }
    }
}

impl FromStr for ConnectionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.eq_ignore_ascii_case("net") {
            Ok(Self::Net)
        } else if token.eq_ignore_ascii_case("serial") {
            Ok(Self::Serial)
        } else {
            Err(Error::InvalidConnection {
                input: s.to_string(),
            })
        }
    }
}

/// Describes how to reach the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionDescriptor {
    kind: ConnectionKind,
    value: String,
    name: String,
}

impl ConnectionDescriptor {
    /// Creates a descriptor whose display name is the value itself.
    pub fn new(kind: ConnectionKind, value: impl Into<String>) -> Result<Self, Error> {
        Self::with_name(kind, value, "")
    }

    /// Creates a descriptor with a display name; a blank name falls back to the value.
    ///
    /// Value and name are trimmed. The value must be non-empty and free of
    /// `,`, which separates it from the name in the text form.
    pub fn with_name(
        kind: ConnectionKind,
        value: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, Error> {
        let value = value.into();
        let name = name.into();
        let value = value.trim();
        if value.is_empty() || value.contains(',') {
            return Err(Error::InvalidConnection {
                input: value.to_string(),
            });
        }

        let name = match name.trim() {
            "" => value,
            name => name,
        };
        Ok(Self {
            kind,
            value: value.to_string(),
            name: name.to_string(),
        })
    }

    /// Shorthand for a serial port descriptor.
    pub fn serial(port: impl Into<String>) -> Result<Self, Error> {
        Self::new(ConnectionKind::Serial, port)
    }

    /// Shorthand for a network descriptor.
    pub fn net(host: impl Into<String>) -> Result<Self, Error> {
        Self::new(ConnectionKind::Net, host)
    }

    /// Connection kind.
    #[must_use]
    pub const fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Port name or host.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the transport this descriptor points at.
    #[must_use]
    pub fn transport(&self) -> Box<dyn Transport> {
        match self.kind {
            ConnectionKind::Serial => Box::new(SerialTransport::with_port(self.value.clone())),
            ConnectionKind::Net => Box::new(TcpTransport::with_host(self.value.clone())),
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() || self.name == self.value {
            write!(f, "{}: {}", self.kind, self.value)
        } else {
            write!(f, "{}: {}, {}", self.kind, self.value, self.name)
        }
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidConnection {
            input: s.to_string(),
        };

        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        let kind: ConnectionKind = kind.parse().map_err(|_| invalid())?;

        let (value, name) = rest.split_once(',').unwrap_or((rest, ""));
        Self::with_name(kind, value, name).map_err(|_| invalid())
    }
}
