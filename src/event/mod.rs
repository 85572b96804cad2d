//! Event system for network notifications.
//!
//! Connection changes, linking results and device status updates are
//! broadcast to every subscriber. Subscribers that fall behind skip the
//! events they missed.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::types::{Address, DeviceCommand, DeviceStatus, Identity};

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Connection established.
    Connected,
    /// Connection closed or lost.
    Disconnected,
    /// Progress of a connection attempt.
    ConnectProgress {
        /// Completion in percent.
        percent: u8,
        /// Human readable step.
        status: String,
        /// Whether the host may still cancel.
        cancelable: bool,
    },
    /// A device completed linking with the controller.
    DeviceLinked { address: Address, identity: Identity },
    /// A device was removed from the controller's link table.
    DeviceUnlinked { address: Address, identity: Identity },
    /// Linking mode ended without a device responding.
    DeviceLinkTimeout,
    /// A device reported or acknowledged a new status.
    DeviceStatusChanged { address: Address, status: DeviceStatus },
    /// A device announced its identity.
    DeviceIdentified { address: Address, identity: Identity },
    /// A device never acknowledged a command.
    DeviceCommandTimeout { address: Address, command: DeviceCommand },
}

/// Event discriminant used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ConnectProgress,
    DeviceLinked,
    DeviceUnlinked,
    DeviceLinkTimeout,
    DeviceStatusChanged,
    DeviceIdentified,
    DeviceCommandTimeout,
}

impl Event {
    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::ConnectProgress { .. } => EventKind::ConnectProgress,
            Self::DeviceLinked { .. } => EventKind::DeviceLinked,
            Self::DeviceUnlinked { .. } => EventKind::DeviceUnlinked,
            Self::DeviceLinkTimeout => EventKind::DeviceLinkTimeout,
            Self::DeviceStatusChanged { .. } => EventKind::DeviceStatusChanged,
            Self::DeviceIdentified { .. } => EventKind::DeviceIdentified,
            Self::DeviceCommandTimeout { .. } => EventKind::DeviceCommandTimeout,
        }
    }

    /// Returns the device the event concerns, if any.
    #[must_use]
    pub const fn address(&self) -> Option<Address> {
        match self {
            Self::DeviceLinked { address, .. }
            | Self::DeviceUnlinked { address, .. }
            | Self::DeviceStatusChanged { address, .. }
            | Self::DeviceIdentified { address, .. }
            | Self::DeviceCommandTimeout { address, .. } => Some(*address),
            Self::Connected
            | Self::Disconnected
            | Self::ConnectProgress { .. }
            | Self::DeviceLinkTimeout => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Subscription filter for specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter by device address.
    pub address: Option<Address>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            address: None,
        }
    }

    /// Creates a filter for events concerning one device.
    #[must_use]
    pub const fn device(address: Address) -> Self {
        Self {
            kinds: None,
            address: Some(address),
        }
    }

    /// Narrows the filter to one device.
    #[must_use]
    pub const fn for_device(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(expected) = self.address {
            if event.address() != Some(expected) {
                return false;
            }
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        tracing::debug!("event: {event:?}");
        // No receivers is fine.
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Only events dispatched after this call are considered.
    pub async fn wait_for(&self, filter: EventFilter, timeout: std::time::Duration) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                loop {
                    if let Some(event) = subscription.recv().await {
                        if filter.matches(&event) {
                            return Some(event);
                        }
                    } else {
                        return None;
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}
