//! Byte-level bridge to the controller.
//!
//! The bridge owns the open transport. Sending a frame writes it, waits
//! for the controller's echo and trailer, and resends on rejection. Bytes
//! the controller sends on its own are parsed into [`Message`]s and handed
//! to a [`MessageSink`] by a background task.
//!
//! All reads and writes happen under one lock, so an unsolicited message
//! arriving in the middle of an echo is dispatched by whichever side holds
//! the lock at the time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{
    ACK, CommandOpcode, EchoStatus, MESSAGE_START, Message, NAK, encode_frame, format_bytes,
    matches_echo, parse_message,
};
use crate::transport::{BoxedReader, BoxedWriter, Transport};
use crate::types::{Address, Identity};

/// Pause between identification attempts.
const NEGOTIATE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Length of the identification reply, start byte and trailer included.
const IM_INFO_REPLY_LEN: usize = 9;

/// Receiver of parsed inbound traffic.
pub(crate) trait MessageSink: Send + Sync {
    /// Called for every message the controller sends on its own.
    fn on_message(&self, message: Message);

    /// Called once when the connection drops without a local close.
    fn on_disconnected(&self);
}

/// An open connection.
struct Link {
    writer: BoxedWriter,
    incoming: mpsc::UnboundedReceiver<Bytes>,
    buffer: BytesMut,
    closed: bool,
}

impl Link {
    fn new(writer: BoxedWriter, incoming: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            writer,
            incoming,
            buffer: BytesMut::with_capacity(256),
            closed: false,
        }
    }

    /// Moves already received chunks into the buffer without waiting.
    fn drain(&mut self) {
        loop {
            match self.incoming.try_recv() {
                Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                Err(mpsc::error::TryRecvError::Empty) => return,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    return;
                }
            }
        }
    }

    /// Waits up to `timeout` for the next chunk. Returns false if none arrived.
    async fn fill(&mut self, timeout: Duration) -> bool {
        if self.closed {
            return false;
        }
        match tokio::time::timeout(timeout, self.incoming.recv()).await {
            Ok(Some(chunk)) => {
                self.buffer.extend_from_slice(&chunk);
                true
            }
            Ok(None) => {
                self.closed = true;
                false
            }
            Err(_) => false,
        }
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        tracing::trace!("sent {}", format_bytes(frame));
        Ok(())
    }
}

/// Bridge between the transport and the message layer.
pub(crate) struct Bridge {
    config: Config,
    sink: Arc<dyn MessageSink>,
    link: Mutex<Option<Link>>,
    connected: AtomicBool,
    data_available: Arc<Notify>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    pub(crate) fn new(config: Config, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            config,
            sink,
            link: Mutex::new(None),
            connected: AtomicBool::new(false),
            data_available: Arc::new(Notify::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Returns true while a connection is open.
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Opens `transport`, identifies the controller and starts inbound processing.
    ///
    /// Any previous connection is closed first.
    pub(crate) async fn connect(self: &Arc<Self>, transport: &dyn Transport) -> Result<(Address, Identity)> {
        self.close().await;

        tracing::info!("connecting to {}", transport.describe());
        let (reader, writer) = transport.open().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(read_pump(reader, tx, Arc::clone(&self.data_available)));

        let mut link = Link::new(writer, rx);
        let info = match self.negotiate(&mut link, self.config.negotiate_retries).await {
            Ok(info) => info,
            Err(e) => {
                pump.abort();
                tracing::warn!("{} did not identify: {e}", transport.describe());
                return Err(e);
            }
        };

        *self.link.lock().await = Some(link);
        self.connected.store(true, Ordering::Release);

        let processor = tokio::spawn(process_inbound(
            Arc::downgrade(self),
            Arc::clone(&self.data_available),
        ));
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(pump);
        tasks.push(processor);

        tracing::info!("connected to controller {}", info.0);
        Ok(info)
    }

    /// Closes the connection. Returns true if one was open.
    pub(crate) async fn close(&self) -> bool {
        let link = self.link.lock().await.take();
        self.connected.store(false, Ordering::Release);
        self.abort_tasks();

        let Some(mut link) = link else {
            return false;
        };
        let _ = link.writer.shutdown().await;
        tracing::info!("connection closed");
        true
    }

    /// Aborts background tasks without waiting for the link lock.
    pub(crate) fn abort_tasks(&self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }

    /// Repeats the identification handshake on the open connection.
    pub(crate) async fn verify(&self) -> bool {
        let mut guard = self.link.lock().await;
        let Some(link) = guard.as_mut() else {
            return false;
        };
        if self.process_data(link).await.is_err() {
            return false;
        }
        self.negotiate(link, 1).await.is_ok()
    }

    /// Sends `message` (without start byte) and returns the echo status.
    ///
    /// Frames that are not acknowledged are resent up to
    /// `send_retries` times with a linearly growing delay. A NAK ends the
    /// attempts early unless `retry_on_nak` is set.
    pub(crate) async fn send(&self, message: &[u8], retry_on_nak: bool) -> Result<EchoStatus> {
        let frame = encode_frame(message);
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(Error::NotConnected)?;

        let mut status = self.send_once(link, &frame).await?;
        let mut retry = 0;
        while status != EchoStatus::Ack
            && (status != EchoStatus::Nak || retry_on_nak)
            && retry < self.config.send_retries
        {
            retry += 1;
            tracing::debug!(
                "{status} for {}, retry {retry}/{}",
                format_bytes(&frame),
                self.config.send_retries
            );
            tokio::time::sleep(self.config.send_retry_delay * retry).await;
            status = self.send_once(link, &frame).await?;
        }

        if status != EchoStatus::Ack {
            tracing::debug!("giving up on {}: {status}", format_bytes(&frame));
        }
        Ok(status)
    }

    async fn send_once(&self, link: &mut Link, frame: &[u8]) -> Result<EchoStatus> {
        self.process_data(link).await?;
        link.write(frame).await?;
        self.read_echo(link, frame).await
    }

    /// Reads the echo of `frame` and its trailer.
    ///
    /// The whole wait is bounded by `echo_timeout`, however much other
    /// traffic arrives meanwhile.
    async fn read_echo(&self, link: &mut Link, frame: &[u8]) -> Result<EchoStatus> {
        let deadline = Instant::now() + self.config.echo_timeout;
        let start = loop {
            if let Some(start) = find_echo(&link.buffer, frame) {
                break Some(start);
            }
            // A lone NAK means the controller rejected the frame without echoing it.
            if link.buffer.first() == Some(&NAK) {
                break None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !link.fill(remaining).await {
                break None;
            }
        };

        let Some(start) = start else {
            if link.buffer.first() == Some(&NAK) {
                link.buffer.advance(1);
                self.process_data(link).await?;
                return Ok(EchoStatus::Nak);
            }
            if link.buffer.is_empty() {
                return if link.closed {
                    Err(Error::NotConnected)
                } else {
                    Ok(EchoStatus::None)
                };
            }
            tracing::debug!(
                "no echo for {} in {}",
                format_bytes(frame),
                format_bytes(&link.buffer)
            );
            self.process_data(link).await?;
            return Ok(EchoStatus::Unknown);
        };

        let preceding = link.buffer.split_to(start);
        let end = frame.len();
        if link.buffer.len() <= end {
            link.fill(self.config.read_timeout).await;
        }
        let status = link
            .buffer
            .get(end)
            .map_or(EchoStatus::Unknown, |&b| EchoStatus::from_trailer(b));
        let consumed = if status == EchoStatus::Unknown { end } else { end + 1 };
        link.buffer.advance(consumed);
        tracing::trace!("echo {status} for {}", format_bytes(frame));

        // Anything received before the echo is unsolicited traffic.
        if !preceding.is_empty() {
            let mut rest = preceding;
            rest.extend_from_slice(&link.buffer);
            link.buffer = rest;
        }
        self.process_data(link).await?;
        Ok(status)
    }

    /// Parses and dispatches everything buffered or already received.
    ///
    /// A partial message waits up to `read_timeout` for its remainder
    /// before it is discarded.
    async fn process_data(&self, link: &mut Link) -> Result<()> {
        link.drain();
        loop {
            if link.buffer.is_empty() {
                break;
            }
            let Some(start) = link.buffer.iter().position(|&b| b == MESSAGE_START) else {
                tracing::warn!("discarding {}", format_bytes(&link.buffer));
                link.buffer.clear();
                break;
            };
            if start > 0 {
                tracing::warn!("skipping {}", format_bytes(&link.buffer[..start]));
                link.buffer.advance(start);
            }

            match parse_message(&link.buffer, 1) {
                Ok(Some((message, length))) => {
                    tracing::trace!("received {}", format_bytes(&link.buffer[..=length]));
                    link.buffer.advance(1 + length);
                    tracing::debug!("message: {message}");
                    self.sink.on_message(message);
                }
                Ok(None) => {
                    if !link.fill(self.config.read_timeout).await {
                        tracing::warn!("discarding incomplete message {}", format_bytes(&link.buffer));
                        link.buffer.clear();
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("{e}");
                    link.buffer.advance(1);
                }
            }
        }

        if link.closed {
            Err(Error::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Runs inbound processing once. Returns false when the connection is gone.
    async fn process_pending(&self) -> bool {
        let mut guard = self.link.lock().await;
        let Some(link) = guard.as_mut() else {
            return false;
        };
        if self.process_data(link).await.is_ok() {
            return true;
        }

        *guard = None;
        self.connected.store(false, Ordering::Release);
        drop(guard);
        tracing::warn!("connection to controller lost");
        self.sink.on_disconnected();
        false
    }

    async fn negotiate(&self, link: &mut Link, attempts: u32) -> Result<(Address, Identity)> {
        let request = encode_frame(&[CommandOpcode::GetImInfo.into()]);
        for attempt in 1..=attempts {
            link.buffer.clear();
            link.write(&request).await?;

            let deadline = Instant::now() + self.config.open_timeout;
            loop {
                if let Some(found) = find_im_info(&link.buffer) {
                    link.buffer.clear();
                    return Ok(found);
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || !link.fill(remaining).await {
                    break;
                }
            }
            if link.closed {
                return Err(Error::NotConnected);
            }

            tracing::debug!("no identification response, attempt {attempt}/{attempts}");
            if attempt < attempts {
                tokio::time::sleep(NEGOTIATE_RETRY_DELAY).await;
            }
        }

        Err(Error::Negotiation {
            message: format!("no response after {attempts} attempts"),
        })
    }
}

/// Finds the offset of the echo of `frame` in `buffer`.
fn find_echo(buffer: &[u8], frame: &[u8]) -> Option<usize> {
    buffer
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == MESSAGE_START)
        .find_map(|(i, _)| matches_echo(frame, buffer, i).map(|_| i))
}

/// Finds the last complete identification reply in `buffer`.
fn find_im_info(buffer: &[u8]) -> Option<(Address, Identity)> {
    let opcode = u8::from(CommandOpcode::GetImInfo);
    buffer
        .windows(IM_INFO_REPLY_LEN)
        .rev()
        .find(|w| w[0] == MESSAGE_START && w[1] == opcode && w[8] == ACK)
        .map(|w| {
            let address = Address::from_bytes([w[2], w[3], w[4]]);
            (address, Identity::new(w[5], w[6], w[7]))
        })
}

/// Forwards everything the transport yields until it ends.
async fn read_pump(mut reader: BoxedReader, tx: mpsc::UnboundedSender<Bytes>, notify: Arc<Notify>) {
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("transport closed");
                break;
            }
            Ok(n) => {
                tracing::trace!("read {n} bytes");
                if tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    return;
                }
                notify.notify_one();
            }
            Err(e) => {
                tracing::warn!("read error: {e}");
                break;
            }
        }
    }
    drop(tx);
    notify.notify_one();
}

async fn process_inbound(bridge: Weak<Bridge>, notify: Arc<Notify>) {
    loop {
        notify.notified().await;
        let Some(bridge) = bridge.upgrade() else {
            return;
        };
        if !bridge.process_pending().await {
            return;
        }
    }
}
