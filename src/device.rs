//! INSTEON devices known to the network.
//!
//! Each device has at most one command in flight. A command stays pending
//! from the controller's ACK until the device itself acknowledges it; if
//! the device stays silent the command is resent until the retry budget
//! runs out, then `DeviceCommandTimeout` is raised.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::Config;
use crate::controller::{Controller, require_ack};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::messenger::{Expect, Messenger};
use crate::protocol::parser::STANDARD_MESSAGE;
use crate::protocol::{EchoStatus, Message, MessageType, PropertyKey, command};
use crate::types::{Address, DeviceCommand, DeviceStatus, Identity, LinkMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DimmerDirection {
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
struct PendingCommand {
    command: DeviceCommand,
    value: u8,
    retries: u32,
    seq: u64,
}

#[derive(Default)]
struct PendingSlot {
    current: Option<PendingCommand>,
    next_seq: u64,
}

impl PendingSlot {
    fn holds(&self, seq: u64) -> bool {
        self.current.is_some_and(|pending| pending.seq == seq)
    }
}

struct DeviceInner {
    address: Address,
    identity: std::sync::RwLock<Identity>,
    messenger: Arc<Messenger>,
    controller: Controller,
    events: EventDispatcher,
    ack_timeout: Duration,
    command_retries: u32,
    pending: std::sync::Mutex<PendingSlot>,
    released: Notify,
    direction: std::sync::Mutex<DimmerDirection>,
}

impl DeviceInner {
    fn pending(&self) -> std::sync::MutexGuard<'_, PendingSlot> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, status: DeviceStatus) {
        tracing::debug!("device {} status {status}", self.address);
        self.events.dispatch(Event::DeviceStatusChanged {
            address: self.address,
            status,
        });
    }

    /// Frees the slot if it still holds command `seq`.
    fn release(&self, seq: u64) {
        {
            let mut slot = self.pending();
            if !slot.holds(seq) {
                return;
            }
            slot.current = None;
        }
        self.released.notify_waiters();
    }

    /// Called when the ACK timer for `seq` fires. Returns the command to
    /// resend, or `None` once it was acknowledged or retries ran out.
    fn next_retry(&self, seq: u64) -> Option<PendingCommand> {
        let mut slot = self.pending();
        let pending = slot.current.as_mut().filter(|p| p.seq == seq)?;
        if pending.retries < self.command_retries {
            pending.retries += 1;
            return Some(*pending);
        }

        let command = pending.command;
        slot.current = None;
        drop(slot);

        tracing::warn!(
            "device {} did not acknowledge {command:?} after {} retries",
            self.address,
            self.command_retries
        );
        self.released.notify_waiters();
        self.events.dispatch(Event::DeviceCommandTimeout {
            address: self.address,
            command,
        });
        None
    }
}

/// Handle to a device. Cheap to clone.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.inner.address)
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

impl Device {
    fn new(
        address: Address,
        identity: Identity,
        messenger: Arc<Messenger>,
        controller: Controller,
        events: EventDispatcher,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                address,
                identity: std::sync::RwLock::new(identity),
                messenger,
                controller,
                events,
                ack_timeout: config.ack_timeout,
                command_retries: config.command_retries,
                pending: std::sync::Mutex::new(PendingSlot::default()),
                released: Notify::new(),
                direction: std::sync::Mutex::new(DimmerDirection::None),
            }),
        }
    }

    /// Returns the device address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Returns the device identity; empty until the device identified itself.
    #[must_use]
    pub fn identity(&self) -> Identity {
        *self
            .inner
            .identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_identity(&self, identity: Identity) {
        *self
            .inner
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = identity;
    }

    /// Returns true while a command awaits the device's acknowledgement.
    #[must_use]
    pub fn has_pending_command(&self) -> bool {
        self.inner.pending().current.is_some()
    }

    /// Commands that make sense for this device's category.
    #[must_use]
    pub fn supported_commands(&self) -> Vec<DeviceCommand> {
        match self.identity().dev_cat {
            // Dimmable lighting
            0x01 => vec![
                DeviceCommand::On,
                DeviceCommand::Off,
                DeviceCommand::FastOn,
                DeviceCommand::FastOff,
                DeviceCommand::Brighten,
                DeviceCommand::Dim,
                DeviceCommand::StartDimming,
                DeviceCommand::StopDimming,
            ],
            // Switched lighting, appliances, load controllers
            0x02 | 0x09 => vec![DeviceCommand::On, DeviceCommand::Off],
            _ => Vec::new(),
        }
    }

    /// Sends `command` with `value` as cmd2.
    ///
    /// Waits (up to the ACK timeout) for a previous command to this device
    /// to finish; a command still pending after that is abandoned. Returns
    /// true once the controller accepted the frame. The device's own
    /// acknowledgement is tracked in the background.
    pub async fn try_command(&self, command: DeviceCommand, value: u8) -> bool {
        self.send_command(command, value).await == EchoStatus::Ack
    }

    /// Sends `command` with its default value (0xFF for On, 0x00 otherwise).
    pub async fn try_command_default(&self, command: DeviceCommand) -> bool {
        self.try_command(command, command.default_value()).await
    }

    /// Blocking form of [`Self::try_command`].
    pub async fn command(&self, command: DeviceCommand, value: u8) -> Result<()> {
        self.ensure_connected()?;
        let status = self.send_command(command, value).await;
        require_ack(status, &command::device_command(self.inner.address, command, value))
    }

    async fn send_command(&self, command: DeviceCommand, value: u8) -> EchoStatus {
        let seq = self.claim(command, value).await;
        let frame = command::device_command(self.inner.address, command, value);

        let status = self.inner.messenger.try_send(&frame).await;
        if status == EchoStatus::Ack {
            // The device may already have answered while the echo was read.
            if self.inner.pending().holds(seq) {
                self.spawn_ack_timer(seq);
            }
        } else {
            tracing::debug!("device {} {command:?} not sent: {status}", self.inner.address);
            self.inner.release(seq);
        }
        status
    }

    /// Takes the pending slot, waiting for the current holder if needed.
    async fn claim(&self, command: DeviceCommand, value: u8) -> u64 {
        let inner = &self.inner;
        loop {
            let released = inner.released.notified();
            let waited_on = {
                let mut slot = inner.pending();
                match slot.current {
                    None => return occupy(&mut slot, command, value),
                    Some(ref pending) => pending.seq,
                }
            };

            if tokio::time::timeout(inner.ack_timeout, released).await.is_err() {
                let mut slot = inner.pending();
                // Only the command we waited on may be abandoned; a newer
                // occupant gets its own full wait.
                if slot.current.as_ref().is_some_and(|p| p.seq != waited_on) {
                    continue;
                }
                if let Some(stuck) = slot.current.take() {
                    tracing::warn!(
                        "device {}: {:?} still pending after {:?}, abandoning it",
                        inner.address,
                        stuck.command,
                        inner.ack_timeout
                    );
                }
                return occupy(&mut slot, command, value);
            }
        }
    }

    fn spawn_ack_timer(&self, seq: u64) {
        let inner: Weak<DeviceInner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.ack_timeout;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(timeout).await;
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let Some(pending) = inner.next_retry(seq) else {
                    return;
                };

                tracing::debug!(
                    "device {} resending {:?}, retry {}/{}",
                    inner.address,
                    pending.command,
                    pending.retries,
                    inner.command_retries
                );
                let frame = command::device_command(inner.address, pending.command, pending.value);
                let status = inner.messenger.try_send(&frame).await;
                if status != EchoStatus::Ack {
                    tracing::debug!("device {} resend not accepted: {status}", inner.address);
                }
            }
        });
    }

    /// Asks the device to identify itself. The answer raises `DeviceIdentified`.
    pub async fn try_identify(&self) -> bool {
        self.set_identity(Identity::EMPTY);
        self.try_command_default(DeviceCommand::IdRequest).await
    }

    /// Blocking form of [`Self::try_identify`].
    pub async fn identify(&self) -> Result<()> {
        self.set_identity(Identity::EMPTY);
        self.command(DeviceCommand::IdRequest, 0).await
    }

    /// Queries the device's current on-level (0-255).
    pub async fn try_get_on_level(&self) -> Option<u8> {
        let frame = command::device_command(self.inner.address, DeviceCommand::StatusRequest, 0);
        let expect = Expect::from_device(STANDARD_MESSAGE, self.inner.address).of_type(MessageType::Ack);
        match self.inner.messenger.try_send_and_wait_for(&frame, true, expect).await {
            (EchoStatus::Ack, Some(properties)) => properties.get(&PropertyKey::Cmd2).map(|&v| v as u8),
            _ => None,
        }
    }

    /// Blocking form of [`Self::try_get_on_level`].
    pub async fn get_on_level(&self) -> Result<u8> {
        self.ensure_connected()?;
        let frame = command::device_command(self.inner.address, DeviceCommand::StatusRequest, 0);
        let expect = Expect::from_device(STANDARD_MESSAGE, self.inner.address).of_type(MessageType::Ack);
        let properties = self.inner.messenger.send_and_wait_for(&frame, expect).await?;
        properties
            .get(&PropertyKey::Cmd2)
            .map(|&v| v as u8)
            .ok_or_else(|| Error::Protocol {
                message: format!("status reply from {} has no level", self.inner.address),
            })
    }

    /// Removes the link between this device and the controller for `group`.
    pub async fn try_unlink(&self, group: u8) -> bool {
        self.inner
            .controller
            .try_enter_link_mode(LinkMode::Delete, group)
            .await
            && self.try_command(DeviceCommand::EnterLinkingMode, group).await
    }

    /// Blocking form of [`Self::try_unlink`].
    pub async fn unlink(&self, group: u8) -> Result<()> {
        self.inner
            .controller
            .enter_link_mode(LinkMode::Delete, group)
            .await?;
        self.command(DeviceCommand::EnterLinkingMode, group).await
    }

    /// Interprets a message sent by this device.
    pub(crate) fn on_message(&self, message: &Message) {
        let inner = &self.inner;
        match message.message_type {
            MessageType::Ack => self.on_ack(message),
            MessageType::Nak => {
                tracing::debug!("device {} rejected a command: {message}", inner.address);
            }
            MessageType::OnCleanup => inner.emit(DeviceStatus::On),
            MessageType::OffCleanup => inner.emit(DeviceStatus::Off),
            MessageType::FastOnCleanup => {
                inner.emit(DeviceStatus::On);
                inner.emit(DeviceStatus::FastOn);
            }
            MessageType::FastOffCleanup => {
                inner.emit(DeviceStatus::Off);
                inner.emit(DeviceStatus::FastOff);
            }
            MessageType::IncrementBeginBroadcast => {
                let up = message.get(PropertyKey::IncrementDirection).unwrap_or(0) != 0;
                *inner.direction.lock().unwrap_or_else(PoisonError::into_inner) =
                    if up { DimmerDirection::Up } else { DimmerDirection::Down };
            }
            MessageType::IncrementEndBroadcast => {
                let direction = std::mem::replace(
                    &mut *inner.direction.lock().unwrap_or_else(PoisonError::into_inner),
                    DimmerDirection::None,
                );
                match direction {
                    DimmerDirection::Up => inner.emit(DeviceStatus::Brighten),
                    DimmerDirection::Down => inner.emit(DeviceStatus::Dim),
                    DimmerDirection::None => {}
                }
            }
            MessageType::SetButtonPressed => self.on_set_button_pressed(message),
            _ => {}
        }
    }

    fn on_ack(&self, message: &Message) {
        let inner = &self.inner;
        let Some(cmd1) = message.byte(PropertyKey::Cmd1) else {
            return;
        };
        let command = {
            let mut slot = inner.pending();
            match slot.current {
                Some(pending) if u8::from(pending.command) == cmd1 => {
                    slot.current = None;
                    pending.command
                }
                _ => return,
            }
        };
        inner.released.notify_waiters();
        tracing::debug!("device {} acknowledged {command:?}", inner.address);

        for &status in acknowledged_statuses(command) {
            inner.emit(status);
        }
    }

    fn on_set_button_pressed(&self, message: &Message) {
        let mut identity = self.identity();
        if identity.is_empty() {
            identity = Identity::new(
                message.byte(PropertyKey::DevCat).unwrap_or_default(),
                message.byte(PropertyKey::SubCat).unwrap_or_default(),
                message.byte(PropertyKey::FirmwareVersion).unwrap_or_default(),
            );
            self.set_identity(identity);
        }
        tracing::info!("device {} identified", self.inner.address);
        self.inner.events.dispatch(Event::DeviceIdentified {
            address: self.inner.address,
            identity,
        });
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.messenger.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

fn occupy(slot: &mut PendingSlot, command: DeviceCommand, value: u8) -> u64 {
    slot.next_seq += 1;
    let seq = slot.next_seq;
    slot.current = Some(PendingCommand {
        command,
        value,
        retries: 0,
        seq,
    });
    seq
}

/// Statuses implied by a device acknowledging `command`.
const fn acknowledged_statuses(command: DeviceCommand) -> &'static [DeviceStatus] {
    match command {
        DeviceCommand::On => &[DeviceStatus::On],
        DeviceCommand::Off => &[DeviceStatus::Off],
        DeviceCommand::FastOn => &[DeviceStatus::On, DeviceStatus::FastOn],
        DeviceCommand::FastOff => &[DeviceStatus::Off, DeviceStatus::FastOff],
        DeviceCommand::Brighten => &[DeviceStatus::Brighten],
        DeviceCommand::Dim => &[DeviceStatus::Dim],
        _ => &[],
    }
}

/// Devices of one session, keyed by address.
pub(crate) struct DeviceRegistry {
    devices: std::sync::RwLock<HashMap<Address, Device>>,
    messenger: Arc<Messenger>,
    controller: Controller,
    events: EventDispatcher,
    config: Config,
}

impl DeviceRegistry {
    pub(crate) fn new(
        messenger: Arc<Messenger>,
        controller: Controller,
        events: EventDispatcher,
        config: Config,
    ) -> Self {
        Self {
            devices: std::sync::RwLock::new(HashMap::new()),
            messenger,
            controller,
            events,
            config,
        }
    }

    pub(crate) fn get(&self, address: Address) -> Option<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
    }

    /// Returns the device for `address`, creating it if needed. A non-empty
    /// `identity` replaces the stored one.
    pub(crate) fn add(&self, address: Address, identity: Identity) -> Device {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(device) = devices.get(&address) {
            if !identity.is_empty() {
                device.set_identity(identity);
            }
            return device.clone();
        }

        tracing::debug!("adding device {address}");
        let device = Device::new(
            address,
            identity,
            Arc::clone(&self.messenger),
            self.controller.clone(),
            self.events.clone(),
            &self.config,
        );
        devices.insert(address, device.clone());
        device
    }

    /// All devices, ordered by address.
    pub(crate) fn all(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        devices.sort_by_key(Device::address);
        devices
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::event::{EventKind, Subscription};
    use crate::network::Session;
    use crate::transport::mock::{self, MockPlm, PLM_ADDRESS};

    const DEVICE: [u8; 3] = [0x1A, 0x2B, 0x3C];

    fn device_ack(cmd1: u8, cmd2: u8) -> Vec<u8> {
        mock::standard_message(DEVICE, PLM_ADDRESS, 0x20, cmd1, cmd2)
    }

    /// ACKs at the controller and answers direct commands as the device would.
    fn responsive_device() -> mock::Responder {
        mock::answering(|frame| {
            let mut reply = mock::ack(frame);
            if frame.get(1) == Some(&0x62) {
                reply.extend(device_ack(frame[6], frame[7]));
            }
            reply
        })
    }

    async fn setup(responder: mock::Responder, config: Config) -> (Session, Device, MockPlm, Subscription) {
        let events = EventDispatcher::new(64);
        let (plm, transport) = MockPlm::start(responder);
        let session = Session::open(&transport, &config, &events, false).await.unwrap();
        let device = session
            .devices
            .add(Address::from_bytes(DEVICE), Identity::new(0x01, 0x20, 0x41));
        let subscription = events.subscribe();
        (session, device, plm, subscription)
    }

    async fn statuses(subscription: &mut Subscription, wait: Duration) -> Vec<DeviceStatus> {
        tokio::time::sleep(wait).await;
        let mut out = Vec::new();
        while let Some(event) = subscription.try_recv() {
            if let Event::DeviceStatusChanged { status, .. } = event {
                out.push(status);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_acknowledged_command_reports_status() {
        let (_session, device, plm, mut subscription) = setup(responsive_device(), mock::test_config()).await;

        assert!(device.try_command_default(DeviceCommand::On).await);
        assert_eq!(
            plm.sent().last().unwrap(),
            &vec![0x02, 0x62, 0x1A, 0x2B, 0x3C, 0x0F, 0x11, 0xFF]
        );
        assert_eq!(
            statuses(&mut subscription, Duration::from_millis(20)).await,
            vec![DeviceStatus::On]
        );
        assert!(!device.has_pending_command());

        assert!(device.try_command(DeviceCommand::FastOff, 0).await);
        assert_eq!(
            statuses(&mut subscription, Duration::from_millis(20)).await,
            vec![DeviceStatus::Off, DeviceStatus::FastOff]
        );
    }

    #[tokio::test]
    async fn test_silent_device_times_out_once() {
        let config = mock::test_config().ack_timeout(Duration::from_millis(30)).command_retries(2);
        let (_session, device, plm, mut subscription) = setup(mock::default_responder(), config).await;

        assert!(device.try_command(DeviceCommand::Off, 0).await);
        assert!(device.has_pending_command());

        assert!(plm.wait_for_count(0x62, 3, Duration::from_millis(500)).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(plm.count(0x62), 3);
        assert!(!device.has_pending_command());

        let mut timeouts = 0;
        while let Some(event) = subscription.try_recv() {
            if let Event::DeviceCommandTimeout { address, command } = event {
                assert_eq!(address, Address::from_bytes(DEVICE));
                assert_eq!(command, DeviceCommand::Off);
                timeouts += 1;
            }
        }
        assert_eq!(timeouts, 1);
    }

    #[tokio::test]
    async fn test_second_command_waits_for_first() {
        let config = mock::test_config().ack_timeout(Duration::from_millis(500));
        let (_session, device, plm, _subscription) = setup(mock::default_responder(), config).await;

        assert!(device.try_command(DeviceCommand::On, 0xFF).await);
        let finished = Arc::new(AtomicBool::new(false));
        let second = tokio::spawn({
            let device = device.clone();
            let finished = Arc::clone(&finished);
            async move {
                let sent = device.try_command(DeviceCommand::Off, 0).await;
                finished.store(true, Ordering::SeqCst);
                sent
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(plm.count(0x62), 1);

        plm.inject(&device_ack(0x11, 0xFF));
        let sent = tokio::time::timeout(Duration::from_millis(200), second)
            .await
            .unwrap()
            .unwrap();
        assert!(sent);
        assert_eq!(plm.count(0x62), 2);
        assert_eq!(plm.sent().last().unwrap()[6], 0x13);
    }

    #[tokio::test]
    async fn test_stuck_command_is_abandoned() {
        let config = mock::test_config().ack_timeout(Duration::from_millis(50)).command_retries(20);
        let (_session, device, _plm, _subscription) = setup(mock::default_responder(), config).await;

        assert!(device.try_command(DeviceCommand::On, 0xFF).await);
        let started = tokio::time::Instant::now();
        assert!(device.try_command(DeviceCommand::Off, 0).await);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(device.has_pending_command());
    }

    /// Waits until a direct command with `cmd1` has been written.
    async fn sent_at(plm: &MockPlm, cmd1: u8) -> tokio::time::Instant {
        loop {
            if plm.sent().iter().any(|f| f.get(1) == Some(&0x62) && f.get(6) == Some(&cmd1)) {
                return tokio::time::Instant::now();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_waiters_only_abandon_the_command_they_waited_on() {
        let ack_timeout = Duration::from_millis(80);
        let config = mock::test_config().ack_timeout(ack_timeout).command_retries(50);
        let (_session, device, plm, _subscription) = setup(mock::default_responder(), config).await;

        assert!(device.try_command(DeviceCommand::On, 0xFF).await);
        let callers: Vec<_> = [DeviceCommand::Off, DeviceCommand::FastOn]
            .into_iter()
            .map(|command| {
                let device = device.clone();
                tokio::spawn(async move { device.try_command(command, 0).await })
            })
            .collect();

        let limit = Duration::from_secs(2);
        let first = tokio::time::timeout(limit, async {
            tokio::select! {
                at = sent_at(&plm, 0x13) => (at, 0x12),
                at = sent_at(&plm, 0x12) => (at, 0x13),
            }
        })
        .await
        .unwrap();
        let (first_at, other) = first;
        let second_at = tokio::time::timeout(limit, sent_at(&plm, other)).await.unwrap();

        // The later caller gives the newer command its own full wait.
        assert!(second_at - first_at >= ack_timeout / 2);
        for caller in callers {
            assert!(caller.await.unwrap());
        }
        assert!(device.has_pending_command());
    }

    #[tokio::test]
    async fn test_rejected_command_frees_slot() {
        let (_session, device, plm, _subscription) = setup(mock::answering(mock::nak), mock::test_config()).await;

        assert!(!device.try_command(DeviceCommand::On, 0xFF).await);
        assert!(!device.has_pending_command());
        assert!(matches!(
            device.command(DeviceCommand::On, 0xFF).await,
            Err(Error::SendFailed {
                status: EchoStatus::Nak,
                ..
            })
        ));
        assert_eq!(plm.count(0x62), 6);
    }

    #[tokio::test]
    async fn test_cleanup_and_dimmer_broadcasts() {
        let (_session, device, plm, mut subscription) = setup(mock::default_responder(), mock::test_config()).await;
        assert_eq!(device.identity().dev_cat, 0x01);

        plm.inject(&mock::standard_message(DEVICE, PLM_ADDRESS, 0x41, 0x12, 0x01));
        plm.inject(&mock::standard_message(DEVICE, [0, 0, 1], 0xCF, 0x17, 0x01));
        plm.inject(&mock::standard_message(DEVICE, [0, 0, 1], 0xCF, 0x18, 0x00));
        plm.inject(&mock::standard_message(DEVICE, [0, 0, 1], 0xCF, 0x17, 0x00));
        plm.inject(&mock::standard_message(DEVICE, [0, 0, 1], 0xCF, 0x18, 0x00));
        // End without a begin carries no direction.
        plm.inject(&mock::standard_message(DEVICE, [0, 0, 1], 0xCF, 0x18, 0x00));

        assert_eq!(
            statuses(&mut subscription, Duration::from_millis(100)).await,
            vec![
                DeviceStatus::On,
                DeviceStatus::FastOn,
                DeviceStatus::Brighten,
                DeviceStatus::Dim
            ]
        );
    }

    #[tokio::test]
    async fn test_identify_fills_empty_identity() {
        let (session, _, plm, mut subscription) = setup(mock::default_responder(), mock::test_config()).await;
        let address = Address::new(0x0A_0B0C);
        let device = session.devices.add(address, Identity::EMPTY);
        assert!(device.supported_commands().is_empty());

        assert!(device.try_identify().await);
        assert_eq!(plm.sent().last().unwrap()[6], 0x10);
        plm.inject(&mock::standard_message([0x0A, 0x0B, 0x0C], [0x02, 0x1A, 0x38], 0x8F, 0x01, 0x00));

        let event = tokio::time::timeout(Duration::from_millis(500), subscription.recv())
            .await
            .unwrap();
        let identity = Identity::new(0x02, 0x1A, 0x38);
        assert_eq!(event, Some(Event::DeviceIdentified { address, identity }));
        assert_eq!(device.identity(), identity);
        assert_eq!(device.supported_commands(), vec![DeviceCommand::On, DeviceCommand::Off]);
    }

    #[tokio::test]
    async fn test_get_on_level() {
        let responder = mock::answering(|frame| {
            let mut reply = mock::ack(frame);
            if frame.get(6) == Some(&0x19) {
                reply.extend(device_ack(0x00, 0x7F));
            }
            reply
        });
        let (_session, device, _plm, _subscription) = setup(responder, mock::test_config()).await;

        assert_eq!(device.try_get_on_level().await, Some(0x7F));
        assert_eq!(device.get_on_level().await.unwrap(), 0x7F);
    }

    #[tokio::test]
    async fn test_get_on_level_ignores_broadcasts_before_reply() {
        let responder = mock::answering(|frame| {
            let mut reply = mock::ack(frame);
            if frame.get(6) == Some(&0x19) {
                reply.extend(mock::standard_message(DEVICE, [0, 0, 1], 0xCF, 0x11, 0x00));
                reply.extend(mock::standard_message(DEVICE, PLM_ADDRESS, 0x41, 0x11, 0x01));
                reply.extend(device_ack(0x00, 0x42));
            }
            reply
        });
        let (_session, device, _plm, _subscription) = setup(responder, mock::test_config()).await;

        assert_eq!(device.try_get_on_level().await, Some(0x42));
        assert_eq!(device.get_on_level().await.unwrap(), 0x42);
    }

    #[tokio::test]
    async fn test_get_on_level_without_reply() {
        let (_session, device, _plm, _subscription) = setup(mock::default_responder(), mock::test_config()).await;
        assert_eq!(device.try_get_on_level().await, None);
        assert!(matches!(device.get_on_level().await, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_unlink_enters_delete_mode_first() {
        let (session, device, plm, _subscription) = setup(responsive_device(), mock::test_config()).await;

        assert!(device.try_unlink(3).await);
        let sent = plm.sent();
        let tail = &sent[sent.len() - 2..];
        assert_eq!(tail[0], vec![0x02, 0x64, 0xFF, 0x03]);
        assert_eq!(tail[1], vec![0x02, 0x62, 0x1A, 0x2B, 0x3C, 0x0F, 0x09, 0x03]);
        assert_eq!(session.controller.link_mode(), Some(LinkMode::Delete));
        assert!(!device.has_pending_command());
    }

    #[test]
    fn test_acknowledged_statuses() {
        assert_eq!(acknowledged_statuses(DeviceCommand::On), &[DeviceStatus::On]);
        assert_eq!(
            acknowledged_statuses(DeviceCommand::FastOn),
            &[DeviceStatus::On, DeviceStatus::FastOn]
        );
        assert!(acknowledged_statuses(DeviceCommand::IdRequest).is_empty());
        assert!(acknowledged_statuses(DeviceCommand::StartDimming).is_empty());
    }

    #[tokio::test]
    async fn test_event_kinds_are_device_scoped() {
        let (_session, device, _plm, mut subscription) = setup(responsive_device(), mock::test_config()).await;
        assert!(device.try_command(DeviceCommand::Dim, 0).await);
        let event = tokio::time::timeout(Duration::from_millis(200), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), EventKind::DeviceStatusChanged);
        assert_eq!(event.address(), Some(device.address()));
    }
}
