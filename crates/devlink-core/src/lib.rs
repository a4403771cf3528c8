//! Devlink - async client for the device-control service IPC protocol.
//!
//! The service runs locally and controls a payment terminal, a printer and
//! a camera. Clients talk to it over a duplex byte stream (a Windows named
//! pipe, a Unix socket or loopback TCP) carrying JSON envelopes: commands,
//! their responses, and unsolicited events.
//!
//! One [`DeviceClient`] owns one connection. Commands wait for the response
//! carrying their `commandId`; events are delivered to every open
//! [`EventListener`] at the same time.
//!
//! # Example
//!
//! ```rust,ignore
//! use devlink::{ClientConfig, DeviceClient, ListenOutcome};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> devlink::Result<()> {
//!     let mut client = DeviceClient::new(ClientConfig::new());
//!     client.connect().await?;
//!
//!     let response = client.payment_start(10000, Duration::from_secs(10)).await?;
//!     if let Some(state) = response.state() {
//!         println!("Terminal is {}", state);
//!     }
//!
//!     let mut listener = client.listen(Duration::from_secs(30))?;
//!     while let Some(event) = listener.next().await {
//!         println!("{} from {}", event.event_type, event.device_type);
//!     }
//!     if listener.outcome() == Some(ListenOutcome::ConnectionClosed) {
//!         eprintln!("service went away");
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod cancel;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod listener;
pub mod state;
pub mod transport;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use client::{DeviceClient, LinkState};
pub use codec::{
    Command, CommandType, Envelope, Event, EventType, Framing, MessageKind, Response,
    ResponseStatus, ServiceError,
};
pub use config::{ClientConfig, ProtocolConfig, TimingConfig};
pub use error::{ErrorKind, LinkError, Result};
pub use listener::{EventListener, ListenOutcome, ListenerState};
pub use state::{state_name, DeviceState};
pub use transport::{Connector, Endpoint, SystemConnector, Transport};
