//! Centralized configuration for the devlink client.
//!
//! Protocol constants live in `ProtocolConfig`; runtime knobs that callers
//! may tune live in `ClientConfig`.

use crate::codec::Framing;
use crate::transport::Endpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire protocol constants shared with the device-control service.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const PROTOCOL_VERSION: &'static str = "1.0";
    pub const DEFAULT_PIPE_NAME: &'static str = r"\\.\pipe\DeviceControllerService";
    pub const DEFAULT_SOCKET_PATH: &'static str = "/tmp/DeviceControllerService.sock";
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
    pub const READ_CHUNK_SIZE: usize = 4096;
}

/// Timing defaults.
pub struct TimingConfig;

impl TimingConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
    pub const LISTEN_TIMEOUT: Duration = Duration::from_secs(30);
    pub const READ_BACKOFF: Duration = Duration::from_millis(100);
    pub const READ_BACKOFF_MAX: Duration = Duration::from_secs(2);
    pub const PIPE_BUSY_BACKOFF: Duration = Duration::from_millis(50);
}

/// Runtime configuration for a [`DeviceClient`](crate::DeviceClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Service endpoint to connect to.
    pub endpoint: Endpoint,
    /// Message framing on the byte stream.
    pub framing: Framing,
    /// Upper bound for establishing the connection.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Largest accepted frame in bytes.
    pub max_message_size: usize,
    /// First delay after a transient read failure.
    #[serde(with = "duration_ms")]
    pub read_backoff: Duration,
    /// Cap for the read backoff.
    #[serde(with = "duration_ms")]
    pub read_backoff_max: Duration,
    /// Number of events buffered per listener before it starts lagging.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            framing: Framing::default(),
            connect_timeout: TimingConfig::CONNECT_TIMEOUT,
            max_message_size: ProtocolConfig::MAX_MESSAGE_SIZE,
            read_backoff: TimingConfig::READ_BACKOFF,
            read_backoff_max: TimingConfig::READ_BACKOFF_MAX,
            event_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the framing mode.
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the base read backoff.
    pub fn with_read_backoff(mut self, delay: Duration) -> Self {
        self.read_backoff = delay;
        self
    }

    /// Set the per-listener event buffer.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
