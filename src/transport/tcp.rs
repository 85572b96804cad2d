//! TCP transport for network attached controllers (e.g. SmartLinc).

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::transport::{BoxedReader, BoxedWriter, Transport};

/// Port network attached controllers listen on.
pub const DEFAULT_PORT: u16 = 9761;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Creates a transport for `host` or `host:port`; the port defaults to [`DEFAULT_PORT`].
    #[must_use]
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the `host:port` string that will be dialed.
    #[must_use]
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            self.host.clone()
        } else {
            format!("{}:{DEFAULT_PORT}", self.host)
        }
    }
}

impl Transport for TcpTransport {
    fn open(&self) -> BoxFuture<'_, Result<(BoxedReader, BoxedWriter)>> {
        Box::pin(async move {
            let endpoint = self.endpoint();
            tracing::info!("connecting to {endpoint}");

            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&endpoint))
                .await
                .map_err(|_| {
                    tracing::error!("connection to {endpoint} timed out");
                    Error::timeout(self.connect_timeout)
                })??;

            // Frames are tiny and latency sensitive.
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("failed to set TCP_NODELAY on {endpoint}: {e}");
            }

            let (reader, writer) = stream.into_split();
            Ok((Box::new(reader) as BoxedReader, Box::new(writer) as BoxedWriter))
        })
    }

    fn describe(&self) -> String {
        format!("net {}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_default_port() {
        assert_eq!(TcpTransport::with_host("192.168.2.5").endpoint(), "192.168.2.5:9761");
        assert_eq!(TcpTransport::with_host("hub.local:4000").endpoint(), "hub.local:4000");
    }

    #[tokio::test]
    async fn test_open_connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let transport = TcpTransport::with_host(addr.to_string());
        assert!(transport.open().await.is_ok());
        assert!(accept.await.unwrap().is_ok());
    }
}
