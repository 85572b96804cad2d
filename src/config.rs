//! Timing and retry configuration for the protocol engine.

use std::time::Duration;

/// Time to wait for the echo of a sent frame.
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_millis(1000);

/// Time to wait for the identification response after opening a port.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Time to wait for a correlated reply after a send was acknowledged.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Maximum time to wait for more bytes of a partially received frame.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Identification attempts made when connecting.
pub const DEFAULT_NEGOTIATE_RETRIES: u32 = 3;

/// Transport-level resends after a NAK.
pub const DEFAULT_SEND_RETRIES: u32 = 3;

/// Base delay between transport resends; attempt `n` waits `n` times this.
pub const DEFAULT_SEND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Time a device has to acknowledge a command.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Device-level resends after an ACK timeout.
pub const DEFAULT_COMMAND_RETRIES: u32 = 3;

/// How long the controller stays in linking mode.
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Default event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Engine configuration.
///
/// Every knob has a fixed default; hosts that need different timing
/// override individual values with the builder methods.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time to wait for the echo of a sent frame.
    pub echo_timeout: Duration,
    /// Time to wait for the identification response on connect.
    pub open_timeout: Duration,
    /// Time to wait for a correlated reply.
    pub message_timeout: Duration,
    /// Time to wait for the rest of a partial frame.
    pub read_timeout: Duration,
    /// Identification attempts on connect.
    pub negotiate_retries: u32,
    /// Transport resends after a NAK.
    pub send_retries: u32,
    /// Base backoff between transport resends.
    pub send_retry_delay: Duration,
    /// Device acknowledgement timeout.
    pub ack_timeout: Duration,
    /// Device resends after an acknowledgement timeout.
    pub command_retries: u32,
    /// Linking mode duration.
    pub link_timeout: Duration,
    /// Create devices for unknown addresses that send messages.
    pub auto_add: bool,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            negotiate_retries: DEFAULT_NEGOTIATE_RETRIES,
            send_retries: DEFAULT_SEND_RETRIES,
            send_retry_delay: DEFAULT_SEND_RETRY_DELAY,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            command_retries: DEFAULT_COMMAND_RETRIES,
            link_timeout: DEFAULT_LINK_TIMEOUT,
            auto_add: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the echo timeout.
    #[must_use]
    pub const fn echo_timeout(mut self, timeout: Duration) -> Self {
        self.echo_timeout = timeout;
        self
    }

    /// Sets the open timeout.
    #[must_use]
    pub const fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the correlated reply timeout.
    #[must_use]
    pub const fn message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Sets the partial frame read timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the number of identification attempts.
    #[must_use]
    pub const fn negotiate_retries(mut self, retries: u32) -> Self {
        self.negotiate_retries = retries;
        self
    }

    /// Sets the transport resend budget and base backoff.
    #[must_use]
    pub const fn send_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.send_retries = retries;
        self.send_retry_delay = delay;
        self
    }

    /// Sets the device acknowledgement timeout.
    #[must_use]
    pub const fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the device resend budget.
    #[must_use]
    pub const fn command_retries(mut self, retries: u32) -> Self {
        self.command_retries = retries;
        self
    }

    /// Sets the linking mode duration.
    #[must_use]
    pub const fn link_timeout(mut self, timeout: Duration) -> Self {
        self.link_timeout = timeout;
        self
    }

    /// Enables or disables automatic device creation.
    #[must_use]
    pub const fn auto_add(mut self, enabled: bool) -> Self {
        self.auto_add = enabled;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
