//! The [`Network`] session: one controller connection plus its devices.
//!
//! A [`Network`] owns everything a connection needs. Dropping it (or
//! calling [`Network::close`]) tears the session down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::config::Config;
use crate::controller::Controller;
use crate::device::{Device, DeviceRegistry};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::messenger::{MessageHandler, Messenger};
use crate::protocol::{Message, MessageType};
use crate::transport::Transport;
use crate::types::{Address, ConnectionDescriptor, Identity};

struct Routes {
    controller: Controller,
    devices: Arc<DeviceRegistry>,
}

/// Hands inbound messages to the device that sent them, or to the controller.
struct Router {
    routes: OnceLock<Routes>,
    auto_add: AtomicBool,
}

impl MessageHandler for Router {
    fn handle(&self, message: &Message) {
        let Some(routes) = self.routes.get() else {
            tracing::debug!("session not ready, dropping {message}");
            return;
        };

        let Some(address) = message.from_address() else {
            routes.controller.on_message(message, &routes.devices);
            return;
        };

        if let Some(device) = routes.devices.get(address) {
            device.on_message(message);
        } else if message.message_type == MessageType::SetButtonPressed {
            // Identification of a device we never linked; nothing to update.
            tracing::debug!("ignoring identification from unknown device {address}");
        } else if self.auto_add.load(Ordering::Relaxed) {
            routes.devices.add(address, Identity::EMPTY).on_message(message);
        } else {
            tracing::warn!("message from unknown device {address}: {message}");
        }
    }
}

/// Live objects of one connection.
pub(crate) struct Session {
    pub(crate) messenger: Arc<Messenger>,
    pub(crate) controller: Controller,
    pub(crate) devices: Arc<DeviceRegistry>,
    router: Arc<Router>,
}

impl Session {
    /// Connects over `transport` and wires the controller and devices to
    /// the inbound message stream.
    pub(crate) async fn open(
        transport: &dyn Transport,
        config: &Config,
        events: &EventDispatcher,
        auto_add: bool,
    ) -> Result<Self> {
        let messenger = Arc::new(Messenger::new(config.clone(), events.clone()));
        let router = Arc::new(Router {
            routes: OnceLock::new(),
            auto_add: AtomicBool::new(auto_add),
        });
        let handler: Weak<Router> = Arc::downgrade(&router);
        messenger.set_handler(handler);

        let (address, identity) = messenger.connect(transport).await?;

        let controller = Controller::new(
            address,
            identity,
            Arc::clone(&messenger),
            events.clone(),
            config.link_timeout,
        );
        let devices = Arc::new(DeviceRegistry::new(
            Arc::clone(&messenger),
            controller.clone(),
            events.clone(),
            config.clone(),
        ));
        let _ = router.routes.set(Routes {
            controller: controller.clone(),
            devices: Arc::clone(&devices),
        });

        Ok(Self {
            messenger,
            controller,
            devices,
            router,
        })
    }

    fn set_auto_add(&self, enabled: bool) {
        self.router.auto_add.store(enabled, Ordering::Relaxed);
    }
}

/// An INSTEON network reached through one PLM.
///
/// # Example
///
/// ```no_run
/// use insteon::{Address, Config, ConnectionDescriptor, DeviceCommand, Identity, Network};
///
/// #[tokio::main]
/// async fn main() -> Result<(), insteon::Error> {
///     let mut network = Network::new(Config::default());
///     let identity = network.connect(&ConnectionDescriptor::serial("/dev/ttyUSB0")?).await?;
///     println!("controller {} {identity:?}", network.controller()?.address());
///
///     let address: Address = "1A.2B.3C".parse()?;
///     let lamp = network.add_device(address, Identity::EMPTY)?;
///     lamp.command(DeviceCommand::On, 0xFF).await?;
///
///     network.close().await;
///     Ok(())
/// }
/// ```
pub struct Network {
    config: Config,
    events: EventDispatcher,
    session: Option<Session>,
    connection: Option<ConnectionDescriptor>,
}

impl Network {
    /// Creates an unconnected network.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let events = EventDispatcher::new(config.event_capacity);
        Self {
            config,
            events,
            session: None,
            connection: None,
        }
    }

    /// Subscribes to all network events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Returns the event dispatcher, e.g. for [`EventDispatcher::wait_for`].
    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Connects to the controller described by `descriptor`.
    ///
    /// An existing connection is closed first. Returns the controller's
    /// identity.
    pub async fn connect(&mut self, descriptor: &ConnectionDescriptor) -> Result<Identity> {
        let transport = descriptor.transport();
        self.connect_transport(transport.as_ref(), descriptor).await
    }

    /// Like [`Self::connect`], reporting failure as `false`.
    pub async fn try_connect(&mut self, descriptor: &ConnectionDescriptor) -> bool {
        match self.connect(descriptor).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("unable to connect to {descriptor}: {e}");
                false
            }
        }
    }

    /// Tries each candidate in order and keeps the first that connects.
    pub async fn connect_first(&mut self, candidates: &[ConnectionDescriptor]) -> Result<Identity> {
        let mut last_error = None;
        for descriptor in candidates {
            match self.connect(descriptor).await {
                Ok(identity) => return Ok(identity),
                Err(e) => {
                    tracing::warn!("unable to connect to {descriptor}: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(Error::NotConnected))
    }

    pub(crate) async fn connect_transport(
        &mut self,
        transport: &dyn Transport,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Identity> {
        self.close().await;

        self.progress(0, format!("Connecting to {descriptor}"), true);
        tracing::info!("connecting to {descriptor} via {}", transport.describe());

        let session = Session::open(transport, &self.config, &self.events, self.config.auto_add).await?;
        let identity = session.controller.identity();
        self.progress(
            50,
            format!("Controller {} identified", session.controller.address()),
            false,
        );

        self.session = Some(session);
        self.connection = Some(descriptor.clone());

        self.progress(100, format!("Connected to {descriptor}"), false);
        tracing::info!("connected to {descriptor}");
        self.events.dispatch(Event::Connected);
        Ok(identity)
    }

    fn progress(&self, percent: u8, status: String, cancelable: bool) {
        self.events.dispatch(Event::ConnectProgress {
            percent,
            status,
            cancelable,
        });
    }

    /// Closes the connection. Safe to call repeatedly; `Disconnected` is
    /// raised at most once per connection.
    pub async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if session.messenger.close().await {
            tracing::info!("connection closed");
        }
        session.messenger.shutdown();
    }

    /// Returns true while the controller link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.messenger.is_connected())
    }

    /// Descriptor of the last successful connection.
    #[must_use]
    pub fn connection(&self) -> Option<&ConnectionDescriptor> {
        self.connection.as_ref()
    }

    /// Re-runs the identification exchange on the open link.
    pub async fn verify_connection(&self) -> bool {
        match &self.session {
            Some(session) => session.messenger.verify().await,
            None => false,
        }
    }

    /// Returns the controller of the current session.
    pub fn controller(&self) -> Result<&Controller> {
        self.session
            .as_ref()
            .map(|session| &session.controller)
            .ok_or(Error::NotConnected)
    }

    /// All known devices, ordered by address.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.session
            .as_ref()
            .map(|session| session.devices.all())
            .unwrap_or_default()
    }

    /// Looks up a known device.
    #[must_use]
    pub fn device(&self, address: Address) -> Option<Device> {
        self.session.as_ref()?.devices.get(address)
    }

    /// Registers a device, or updates the identity of a known one when
    /// `identity` is not empty.
    pub fn add_device(&self, address: Address, identity: Identity) -> Result<Device> {
        let session = self.session.as_ref().ok_or(Error::NotConnected)?;
        Ok(session.devices.add(address, identity))
    }

    /// Controls whether messages from unknown devices create them.
    pub fn set_auto_add(&mut self, enabled: bool) {
        self.config.auto_add = enabled;
        if let Some(session) = &self.session {
            session.set_auto_add(enabled);
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.messenger.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::EventKind;
    use crate::transport::mock::{self, MockPlm, PLM_ADDRESS};
    use crate::types::DeviceStatus;

    const DEVICE: [u8; 3] = [0x1A, 0x2B, 0x3C];

    fn network() -> Network {
        Network::new(mock::test_config())
    }

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::net("mock").unwrap()
    }

    async fn connected(network: &mut Network) -> MockPlm {
        let (plm, transport) = MockPlm::with_defaults();
        network.connect_transport(&transport, &descriptor()).await.unwrap();
        plm
    }

    fn drain(subscription: &mut Subscription) -> Vec<Event> {
        std::iter::from_fn(|| subscription.try_recv()).collect()
    }

    #[tokio::test]
    async fn test_connect_reports_progress() {
        let mut network = network();
        let mut subscription = network.subscribe();
        let (_plm, transport) = MockPlm::with_defaults();

        let identity = network.connect_transport(&transport, &descriptor()).await.unwrap();
        assert_eq!(identity, Identity::new(0x03, 0x15, 0x9E));
        assert!(network.is_connected());
        assert_eq!(network.connection(), Some(&descriptor()));
        assert_eq!(
            network.controller().unwrap().address(),
            Address::from_bytes(PLM_ADDRESS)
        );

        let events = drain(&mut subscription);
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                Event::ConnectProgress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![0, 50, 100]);
        assert_eq!(events.last(), Some(&Event::Connected));
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_network_closed() {
        let mut network = network();
        let (_plm, transport) = MockPlm::start(Box::new(|_: &[u8]| Vec::new()));

        let result = network.connect_transport(&transport, &descriptor()).await;
        assert!(matches!(result, Err(Error::Negotiation { .. })));
        assert!(!network.is_connected());
        assert!(network.connection().is_none());
        assert!(matches!(network.controller(), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_not_connected_accessors() {
        let network = network();
        assert!(!network.is_connected());
        assert!(!network.verify_connection().await);
        assert!(network.devices().is_empty());
        assert!(network.device(Address::new(1)).is_none());
        assert!(matches!(
            network.add_device(Address::new(1), Identity::EMPTY),
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut network = network();
        let _plm = connected(&mut network).await;
        let mut subscription = network.subscribe();

        network.close().await;
        network.close().await;
        assert!(!network.is_connected());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let disconnects = drain(&mut subscription)
            .into_iter()
            .filter(|event| event.kind() == EventKind::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_lost_link_reports_disconnect_once() {
        let mut network = network();
        let plm = connected(&mut network).await;
        let mut subscription = network.subscribe();

        plm.unplug();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!network.is_connected());

        network.close().await;
        let disconnects = drain(&mut subscription)
            .into_iter()
            .filter(|event| event.kind() == EventKind::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let mut network = network();
        let _first = connected(&mut network).await;
        let device = network.add_device(Address::from_bytes(DEVICE), Identity::EMPTY).unwrap();
        assert_eq!(network.devices().len(), 1);
        assert_eq!(network.device(device.address()).unwrap().address(), device.address());

        let _second = connected(&mut network).await;
        assert!(network.is_connected());
        assert!(network.devices().is_empty());
    }

    #[tokio::test]
    async fn test_verify_connection() {
        let mut network = network();
        let plm = connected(&mut network).await;
        assert!(network.verify_connection().await);
        assert_eq!(plm.count(0x60), 2);
    }

    #[tokio::test]
    async fn test_unknown_devices_ignored_without_auto_add() {
        let mut network = network();
        let plm = connected(&mut network).await;

        plm.inject(&mock::standard_message(DEVICE, PLM_ADDRESS, 0x41, 0x11, 0x01));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(network.device(Address::from_bytes(DEVICE)).is_none());
    }

    #[tokio::test]
    async fn test_auto_add_creates_devices() {
        let mut network = network();
        let plm = connected(&mut network).await;
        network.set_auto_add(true);
        let mut subscription = network.subscribe();

        plm.inject(&mock::standard_message(DEVICE, PLM_ADDRESS, 0x41, 0x11, 0x01));
        // Identification from a stranger never creates a device.
        plm.inject(&mock::standard_message([0x0A, 0x0B, 0x0C], [0x01, 0x20, 0x41], 0x8F, 0x01, 0x00));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let address = Address::from_bytes(DEVICE);
        assert_eq!(network.devices().len(), 1);
        assert!(network.device(address).unwrap().identity().is_empty());
        assert_eq!(
            drain(&mut subscription),
            vec![Event::DeviceStatusChanged {
                address,
                status: DeviceStatus::On,
            }]
        );
    }

    #[tokio::test]
    async fn test_link_report_registers_device() {
        let mut network = network();
        let plm = connected(&mut network).await;

        plm.inject(&mock::link_complete(0x01, 0x00, DEVICE, [0x01, 0x20, 0x41]));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let device = network.device(Address::from_bytes(DEVICE)).unwrap();
        assert_eq!(device.identity(), Identity::new(0x01, 0x20, 0x41));
    }

    #[tokio::test]
    async fn test_connect_first_without_candidates() {
        let mut network = network();
        assert!(matches!(network.connect_first(&[]).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_try_connect_unreachable_host() {
        let mut network = network();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(!network.try_connect(&ConnectionDescriptor::net(endpoint).unwrap()).await);
        assert!(!network.is_connected());
    }
}
