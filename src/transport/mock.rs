//! Scripted in-memory PLM for deterministic tests.
//!
//! [`MockPlm`] owns the controller side of a duplex pipe. It reassembles
//! the frames the host writes, records them, and answers each one through
//! a responder closure. Tests can also inject unsolicited bytes at any time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{ACK, MESSAGE_START, NAK};
use crate::transport::{BoxedReader, BoxedWriter, Transport};

/// Controller address reported by [`im_info_reply`] in tests.
pub(crate) const PLM_ADDRESS: [u8; 3] = [0x11, 0x22, 0x33];

/// Produces the bytes the mock answers a host frame with.
pub(crate) type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Host frame length (start byte included) for a command byte.
fn host_frame_length(command: u8) -> Option<usize> {
    match command {
        0x60 | 0x65 | 0x69 | 0x6A => Some(2),
        0x61 => Some(5),
        0x62 => Some(8),
        0x64 => Some(4),
        _ => None,
    }
}

/// Echo of `frame` followed by ACK.
pub(crate) fn ack(frame: &[u8]) -> Vec<u8> {
    let mut out = frame.to_vec();
    out.push(ACK);
    out
}

/// Echo of `frame` followed by NAK.
pub(crate) fn nak(frame: &[u8]) -> Vec<u8> {
    let mut out = frame.to_vec();
    out.push(NAK);
    out
}

/// Identification reply for the given controller identity.
pub(crate) fn im_info_reply(address: [u8; 3], dev_cat: u8, sub_cat: u8, firmware: u8) -> Vec<u8> {
    vec![
        MESSAGE_START,
        0x60,
        address[0],
        address[1],
        address[2],
        dev_cat,
        sub_cat,
        firmware,
        ACK,
    ]
}

/// A complete inbound standard message frame.
pub(crate) fn standard_message(from: [u8; 3], to: [u8; 3], flags: u8, cmd1: u8, cmd2: u8) -> Vec<u8> {
    vec![
        MESSAGE_START,
        0x50,
        from[0],
        from[1],
        from[2],
        to[0],
        to[1],
        to[2],
        flags,
        cmd1,
        cmd2,
    ]
}

/// A complete link-complete frame.
pub(crate) fn link_complete(code: u8, group: u8, address: [u8; 3], identity: [u8; 3]) -> Vec<u8> {
    vec![
        MESSAGE_START,
        0x53,
        code,
        group,
        address[0],
        address[1],
        address[2],
        identity[0],
        identity[1],
        identity[2],
    ]
}

/// A complete link record frame.
pub(crate) fn link_record(flags: u8, group: u8, address: [u8; 3], data: [u8; 3]) -> Vec<u8> {
    vec![
        MESSAGE_START,
        0x57,
        flags,
        group,
        address[0],
        address[1],
        address[2],
        data[0],
        data[1],
        data[2],
    ]
}

/// Answers the identification request and ACKs every other frame.
pub(crate) fn default_responder() -> Responder {
    answering(ack)
}

/// Answers the identification request and hands every other frame to `other`.
pub(crate) fn answering(mut other: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) -> Responder {
    Box::new(move |frame: &[u8]| match frame.get(1) {
        Some(0x60) => im_info_reply(PLM_ADDRESS, 0x03, 0x15, 0x9E),
        _ => other(frame),
    })
}

/// Millisecond-scale timing for tests.
pub(crate) fn test_config() -> Config {
    Config::new()
        .echo_timeout(Duration::from_millis(50))
        .open_timeout(Duration::from_millis(100))
        .read_timeout(Duration::from_millis(30))
        .message_timeout(Duration::from_millis(100))
        .send_retries(2, Duration::from_millis(1))
        .ack_timeout(Duration::from_millis(100))
        .command_retries(2)
}

/// Routes engine logs to the test output; filter with `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transport handing out the host side of the pipe exactly once.
pub(crate) struct MockTransport {
    stream: Mutex<Option<DuplexStream>>,
}

impl Transport for MockTransport {
    fn open(&self) -> BoxFuture<'_, Result<(BoxedReader, BoxedWriter)>> {
        Box::pin(async move {
            let stream = self
                .stream
                .lock()
                .map_err(|_| Error::NotConnected)?
                .take()
                .ok_or(Error::NotConnected)?;
            let (reader, writer) = tokio::io::split(stream);
            Ok((Box::new(reader) as BoxedReader, Box::new(writer) as BoxedWriter))
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Controller side of the pipe.
pub(crate) struct MockPlm {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    inject: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl MockPlm {
    /// Starts a mock controller answering with `responder`.
    pub(crate) fn start(mut responder: Responder) -> (Self, MockTransport) {
        init_tracing();
        let (host, plm) = tokio::io::duplex(4096);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (inject, mut injected) = mpsc::unbounded_channel::<Vec<u8>>();

        let log = Arc::clone(&sent);
        let task = tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(plm);
            let mut pending: Vec<u8> = Vec::new();
            let mut buf = [0u8; 256];

            loop {
                tokio::select! {
                    read = reader.read(&mut buf) => {
                        let n = match read {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        pending.extend_from_slice(&buf[..n]);

                        while let Some(frame) = take_frame(&mut pending) {
                            if let Ok(mut log) = log.lock() {
                                log.push(frame.clone());
                            }
                            let reply = responder(&frame);
                            if !reply.is_empty() && writer.write_all(&reply).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(bytes) = injected.recv() => {
                        if writer.write_all(&bytes).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let transport = MockTransport {
            stream: Mutex::new(Some(host)),
        };
        (Self { sent, inject, task }, transport)
    }

    /// Starts a mock controller with [`default_responder`].
    pub(crate) fn with_defaults() -> (Self, MockTransport) {
        Self::start(default_responder())
    }

    /// Frames received from the host so far.
    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Number of received frames with the given command byte.
    pub(crate) fn count(&self, command: u8) -> usize {
        self.sent().iter().filter(|f| f.get(1) == Some(&command)).count()
    }

    /// Writes unsolicited bytes to the host.
    pub(crate) fn inject(&self, bytes: &[u8]) {
        let _ = self.inject.send(bytes.to_vec());
    }

    /// Waits until `count` frames with `command` were received or `timeout` elapses.
    pub(crate) async fn wait_for_count(&self, command: u8, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.count(command) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.count(command) >= count
    }

    /// Drops the controller side, which the host sees as end of stream.
    pub(crate) fn unplug(&self) {
        self.task.abort();
    }
}

impl Drop for MockPlm {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Removes one complete host frame from the front of `pending`.
fn take_frame(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = pending.iter().position(|&b| b == MESSAGE_START)?;
    pending.drain(..start);
    let command = *pending.get(1)?;
    let Some(length) = host_frame_length(command) else {
        return Some(std::mem::take(pending));
    };
    (pending.len() >= length).then(|| pending.drain(..length).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_frame_reassembles() {
        let mut pending = vec![0xFF, 0x02, 0x62, 0x1A, 0x2B];
        assert_eq!(take_frame(&mut pending), None);
        pending.extend_from_slice(&[0x3C, 0x0F, 0x11, 0xFF, 0x02, 0x65]);
        assert_eq!(
            take_frame(&mut pending),
            Some(vec![0x02, 0x62, 0x1A, 0x2B, 0x3C, 0x0F, 0x11, 0xFF])
        );
        assert_eq!(take_frame(&mut pending), Some(vec![0x02, 0x65]));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_mock_answers_identification() {
        let (plm, transport) = MockPlm::with_defaults();
        let (mut reader, mut writer) = transport.open().await.unwrap();
        writer.write_all(&[0x02, 0x60]).await.unwrap();

        let mut reply = [0u8; 9];
        reader.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply.to_vec(), im_info_reply(PLM_ADDRESS, 0x03, 0x15, 0x9E));
        assert_eq!(plm.count(0x60), 1);
        assert!(transport.open().await.is_err());
    }
}
