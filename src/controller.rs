//! The INSTEON controller (PLM) as a network participant.
//!
//! Linking is a small state machine:
//! ```text
//! Idle ──enter (ACK)──▶ Linking(mode) ──link report / cancel / timer──▶ Idle
//! ```
//! The link timer only runs while linking.

use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::device::DeviceRegistry;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::messenger::{Expect, Messenger};
use crate::protocol::parser::LINK_RECORD;
use crate::protocol::{EchoStatus, Message, MessageType, PropertyKey, command, format_bytes};
use crate::types::{Address, GroupCommand, Identity, LinkMode, LinkRecord};

#[derive(Default)]
struct LinkState {
    mode: Option<LinkMode>,
    active: bool,
    timer: Option<JoinHandle<()>>,
    epoch: u64,
}

impl LinkState {
    /// Returns to idle and reports the mode that was set.
    fn reset(&mut self) -> Option<LinkMode> {
        self.epoch += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.active = false;
        self.mode.take()
    }
}

struct ControllerInner {
    address: Address,
    identity: Identity,
    messenger: Arc<Messenger>,
    events: EventDispatcher,
    link_timeout: Duration,
    state: std::sync::Mutex<LinkState>,
}

impl ControllerInner {
    fn state(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link_timer_expired(&self, epoch: u64) {
        {
            let mut state = self.state();
            if state.epoch != epoch || !state.active {
                return;
            }
            // Running inside the timer task; don't abort ourselves.
            state.timer = None;
            state.reset();
        }
        tracing::info!("linking mode timed out after {:?}", self.link_timeout);
        self.events.dispatch(Event::DeviceLinkTimeout);
    }
}

/// Handle to the connected controller. Cheap to clone.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    pub(crate) fn new(
        address: Address,
        identity: Identity,
        messenger: Arc<Messenger>,
        events: EventDispatcher,
        link_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                address,
                identity,
                messenger,
                events,
                link_timeout,
                state: std::sync::Mutex::new(LinkState::default()),
            }),
        }
    }

    /// Returns the controller's own address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Returns the controller's identity.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.inner.identity
    }

    /// Returns true while the controller is in linking mode.
    #[must_use]
    pub fn is_in_linking_mode(&self) -> bool {
        self.inner.state().active
    }

    /// Returns the requested linking mode, if linking is in progress.
    #[must_use]
    pub fn link_mode(&self) -> Option<LinkMode> {
        self.inner.state().mode
    }

    /// Puts the controller into linking mode for `group`.
    ///
    /// `DeviceLinked` (or `DeviceUnlinked` for [`LinkMode::Delete`]) is
    /// raised when a device responds; `DeviceLinkTimeout` if none does
    /// within the link timeout.
    pub async fn try_enter_link_mode(&self, mode: LinkMode, group: u8) -> bool {
        self.enter_link_mode_status(mode, group).await == EchoStatus::Ack
    }

    /// Blocking form of [`Self::try_enter_link_mode`].
    pub async fn enter_link_mode(&self, mode: LinkMode, group: u8) -> Result<()> {
        self.ensure_connected()?;
        let status = self.enter_link_mode_status(mode, group).await;
        require_ack(status, &command::enter_link_mode(mode, group))
    }

    async fn enter_link_mode_status(&self, mode: LinkMode, group: u8) -> EchoStatus {
        let epoch = {
            let mut state = self.inner.state();
            state.reset();
            state.mode = Some(mode);
            state.epoch
        };

        let status = self
            .inner
            .messenger
            .try_send(&command::enter_link_mode(mode, group))
            .await;

        let mut state = self.inner.state();
        if state.epoch != epoch {
            // A link report or cancel already ended this attempt.
            return status;
        }
        if status != EchoStatus::Ack {
            state.mode = None;
            return status;
        }

        state.active = true;
        state.timer = Some(self.spawn_link_timer(epoch));
        tracing::debug!("linking mode {mode:?} entered for group {group}");
        status
    }

    fn spawn_link_timer(&self, epoch: u64) -> JoinHandle<()> {
        let inner: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.link_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = inner.upgrade() {
                inner.link_timer_expired(epoch);
            }
        })
    }

    /// Leaves linking mode.
    ///
    /// Local state is reset even when the controller rejects the cancel.
    pub async fn try_cancel_link_mode(&self) -> bool {
        self.cancel_link_mode_status().await == EchoStatus::Ack
    }

    /// Blocking form of [`Self::try_cancel_link_mode`].
    pub async fn cancel_link_mode(&self) -> Result<()> {
        self.ensure_connected()?;
        let status = self.cancel_link_mode_status().await;
        require_ack(status, &command::cancel_link_mode())
    }

    async fn cancel_link_mode_status(&self) -> EchoStatus {
        self.inner.state().reset();
        self.inner.messenger.try_send(&command::cancel_link_mode()).await
    }

    /// Reads the controller's link table.
    ///
    /// An empty table is a successful, empty result. Returns `None` if the
    /// enumeration fails part way.
    pub async fn try_get_links(&self) -> Option<Vec<LinkRecord>> {
        let messenger = &self.inner.messenger;
        let expect = Expect::message(LINK_RECORD);
        let mut links = Vec::new();

        let (status, properties) = messenger
            .try_send_and_wait_for(&command::get_first_link(), false, expect)
            .await;
        match status {
            EchoStatus::Nak => return Some(links),
            EchoStatus::Ack => links.push(LinkRecord::from_properties(&properties?)),
            status => {
                tracing::debug!("reading first link record failed: {status}");
                return None;
            }
        }

        loop {
            let (status, properties) = messenger
                .try_send_and_wait_for(&command::get_next_link(), false, expect)
                .await;
            match status {
                EchoStatus::Ack => links.push(LinkRecord::from_properties(&properties?)),
                EchoStatus::Nak => break,
                status => {
                    tracing::debug!("reading link record {} failed: {status}", links.len() + 1);
                    return None;
                }
            }
        }

        tracing::debug!("read {} link records", links.len());
        Some(links)
    }

    /// Blocking form of [`Self::try_get_links`].
    pub async fn get_links(&self) -> Result<Vec<LinkRecord>> {
        self.ensure_connected()?;
        self.try_get_links().await.ok_or_else(|| Error::Protocol {
            message: "failed to read the link table".to_string(),
        })
    }

    /// Broadcasts a group command.
    ///
    /// Commands that require a value are refused without one.
    pub async fn try_group_command(&self, command: GroupCommand, group: u8, value: Option<u8>) -> bool {
        if command.requires_value() && value.is_none() {
            tracing::warn!("{command:?} requires a value");
            return false;
        }
        let frame = command::group_command(command, group, value.unwrap_or(0));
        self.inner.messenger.try_send(&frame).await == EchoStatus::Ack
    }

    /// Blocking form of [`Self::try_group_command`].
    pub async fn group_command(&self, command: GroupCommand, group: u8, value: Option<u8>) -> Result<()> {
        if command.requires_value() && value.is_none() {
            return Err(Error::InvalidArgument {
                reason: format!("{command:?} requires a value"),
            });
        }
        self.ensure_connected()?;
        let frame = command::group_command(command, group, value.unwrap_or(0));
        require_ack(self.inner.messenger.try_send(&frame).await, &frame)
    }

    /// Handles a message that carries no device source address.
    pub(crate) fn on_message(&self, message: &Message, devices: &DeviceRegistry) {
        if message.message_type != MessageType::DeviceLink {
            tracing::debug!("controller received {message}");
            return;
        }
        let Some(address) = message.get(PropertyKey::Address).map(Address::new) else {
            return;
        };
        let identity = Identity::new(
            message.byte(PropertyKey::DevCat).unwrap_or_default(),
            message.byte(PropertyKey::SubCat).unwrap_or_default(),
            message.byte(PropertyKey::FirmwareVersion).unwrap_or_default(),
        );

        devices.add(address, identity);
        let mode = self.inner.state().reset();

        let event = if mode == Some(LinkMode::Delete) {
            tracing::info!("device {address} unlinked");
            Event::DeviceUnlinked { address, identity }
        } else {
            tracing::info!("device {address} linked");
            Event::DeviceLinked { address, identity }
        };
        self.inner.events.dispatch(event);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.messenger.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

/// Maps a non-ACK status to [`Error::SendFailed`].
pub(crate) fn require_ack(status: EchoStatus, frame: &[u8]) -> Result<()> {
    if status == EchoStatus::Ack {
        Ok(())
    } else {
        Err(Error::SendFailed {
            frame: format_bytes(frame),
            status,
        })
    }
}
