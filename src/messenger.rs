//! Send orchestration and inbound dispatch.
//!
//! The [`Messenger`] owns the [`Bridge`] for the lifetime of a connection.
//! Inbound messages are first routed to the handler installed by the
//! network (devices and controller), then used to complete any correlated
//! request waiting for that message id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, Weak};

use tokio::sync::oneshot;

use crate::bridge::{Bridge, MessageSink};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::{EchoStatus, Message, MessageType, Properties, format_bytes};
use crate::transport::Transport;
use crate::types::{Address, Identity};

/// Receives every inbound message before correlated waits see it.
pub(crate) trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message);
}

/// Reply a correlated request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Expect {
    /// Command byte of the expected inbound message (e.g. `0x57`).
    message_id: u8,
    /// Only accept the reply from this device.
    from: Option<Address>,
    /// Only accept this classification of the reply.
    message_type: Option<MessageType>,
}

impl Expect {
    /// Expects any message with the given id.
    pub(crate) const fn message(message_id: u8) -> Self {
        Self {
            message_id,
            from: None,
            message_type: None,
        }
    }

    /// Expects a message with the given id sent by `address`.
    pub(crate) const fn from_device(message_id: u8, address: Address) -> Self {
        Self {
            message_id,
            from: Some(address),
            message_type: None,
        }
    }

    /// Narrows the expectation to one message type.
    pub(crate) const fn of_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    fn matches(&self, message: &Message) -> bool {
        message.message_id == self.message_id
            && self.from.is_none_or(|from| message.from_address() == Some(from))
            && self.message_type.is_none_or(|kind| message.message_type == kind)
    }
}

struct WaitItem {
    id: u64,
    expect: Expect,
    reply: Option<oneshot::Sender<Properties>>,
}

/// Inbound side of the messenger, installed as the bridge's sink.
struct Correlator {
    waits: std::sync::Mutex<Vec<WaitItem>>,
    next_id: AtomicU64,
    handler: OnceLock<Weak<dyn MessageHandler>>,
    events: EventDispatcher,
}

impl Correlator {
    fn register(&self, expect: Expect) -> (u64, oneshot::Receiver<Properties>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WaitItem {
                id,
                expect,
                reply: Some(tx),
            });
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|item| item.id != id);
    }

    fn complete_waits(&self, message: &Message) {
        let mut waits = self.waits.lock().unwrap_or_else(PoisonError::into_inner);
        for item in waits.iter_mut().filter(|item| item.expect.matches(message)) {
            if let Some(reply) = item.reply.take() {
                let _ = reply.send(message.properties.clone());
            }
        }
    }
}

impl MessageSink for Correlator {
    fn on_message(&self, message: Message) {
        match self.handler.get().and_then(Weak::upgrade) {
            Some(handler) => handler.handle(&message),
            None => tracing::debug!("no handler for {message}"),
        }
        self.complete_waits(&message);
    }

    fn on_disconnected(&self) {
        // Dropping the senders wakes every waiter.
        self.waits.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.events.dispatch(Event::Disconnected);
    }
}

/// Sends frames to the controller and correlates replies.
pub(crate) struct Messenger {
    bridge: Arc<Bridge>,
    correlator: Arc<Correlator>,
    events: EventDispatcher,
    config: Config,
}

impl Messenger {
    pub(crate) fn new(config: Config, events: EventDispatcher) -> Self {
        let correlator = Arc::new(Correlator {
            waits: std::sync::Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            handler: OnceLock::new(),
            events: events.clone(),
        });
        let bridge = Arc::new(Bridge::new(config.clone(), correlator.clone()));
        Self {
            bridge,
            correlator,
            events,
            config,
        }
    }

    /// Installs the inbound message handler. Only the first call has an effect.
    pub(crate) fn set_handler(&self, handler: Weak<dyn MessageHandler>) {
        if self.correlator.handler.set(handler).is_err() {
            tracing::warn!("message handler already installed");
        }
    }

    pub(crate) async fn connect(&self, transport: &dyn Transport) -> Result<(Address, Identity)> {
        self.bridge.connect(transport).await
    }

    /// Closes the connection, emitting `Disconnected` if one was open.
    pub(crate) async fn close(&self) -> bool {
        let was_open = self.bridge.close().await;
        if was_open {
            self.events.dispatch(Event::Disconnected);
        }
        was_open
    }

    /// Stops background work without waiting; used from `Drop`.
    pub(crate) fn shutdown(&self) {
        self.bridge.abort_tasks();
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.bridge.is_connected()
    }

    pub(crate) async fn verify(&self) -> bool {
        self.bridge.verify().await
    }

    /// Sends `message`, resending on NAK.
    pub(crate) async fn try_send(&self, message: &[u8]) -> EchoStatus {
        self.try_send_with(message, true).await
    }

    /// Sends `message`. Transport failures close the connection and yield
    /// [`EchoStatus::None`].
    pub(crate) async fn try_send_with(&self, message: &[u8], retry_on_nak: bool) -> EchoStatus {
        match self.bridge.send(message, retry_on_nak).await {
            Ok(status) => status,
            Err(Error::NotConnected) if !self.bridge.is_connected() => {
                tracing::debug!("not connected, dropping {}", format_bytes(message));
                EchoStatus::None
            }
            Err(e) => {
                tracing::error!("failed to send {}: {e}", format_bytes(message));
                self.close().await;
                EchoStatus::None
            }
        }
    }

    /// Sends `message` and fails unless the controller acknowledges it.
    pub(crate) async fn send(&self, message: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        match self.try_send(message).await {
            EchoStatus::Ack => Ok(()),
            status => Err(Error::SendFailed {
                frame: format_bytes(message),
                status,
            }),
        }
    }

    /// Sends `message` and waits up to `message_timeout` for the expected reply.
    ///
    /// The wait is registered before sending, so a reply arriving with the
    /// echo is not missed.
    pub(crate) async fn try_send_and_wait_for(
        &self,
        message: &[u8],
        retry_on_nak: bool,
        expect: Expect,
    ) -> (EchoStatus, Option<Properties>) {
        let (id, reply) = self.correlator.register(expect);
        let status = self.try_send_with(message, retry_on_nak).await;

        let properties = if status == EchoStatus::Ack {
            match tokio::time::timeout(self.config.message_timeout, reply).await {
                Ok(Ok(properties)) => Some(properties),
                Ok(Err(_)) => None,
                Err(_) => {
                    tracing::debug!(
                        "no reply 0x{:02X} to {} within {:?}",
                        expect.message_id,
                        format_bytes(message),
                        self.config.message_timeout
                    );
                    None
                }
            }
        } else {
            None
        };

        self.correlator.unregister(id);
        (status, properties)
    }

    /// Blocking form of [`Self::try_send_and_wait_for`].
    pub(crate) async fn send_and_wait_for(&self, message: &[u8], expect: Expect) -> Result<Properties> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        match self.try_send_and_wait_for(message, true, expect).await {
            (EchoStatus::Ack, Some(properties)) => Ok(properties),
            (EchoStatus::Ack, None) => Err(Error::timeout(self.config.message_timeout)),
            (status, _) => Err(Error::SendFailed {
                frame: format_bytes(message),
                status,
            }),
        }
    }
}
