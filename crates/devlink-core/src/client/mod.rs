//! Command dispatcher for the device-control service.
//!
//! A connected [`DeviceClient`] runs one reader task per connection. The
//! task demultiplexes incoming frames: responses complete the command
//! waiting on the same `commandId`, events fan out to every open
//! [`EventListener`]. Commands and listeners can therefore be used at the
//! same time, from any number of tasks.

mod commands;
mod pending;
mod reader;

use crate::backoff::BackoffConfig;
use crate::cancel::CancellationToken;
use crate::codec::{self, Command, CommandType, Event, Response};
use crate::config::ClientConfig;
use crate::error::{LinkError, Result};
use crate::listener::EventListener;
use crate::transport::{Connector, Endpoint, SystemConnector, Transport, TransportWriter};
use pending::{PendingGuard, PendingTable};
use reader::Demux;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Liveness of the current connection as seen by the reader task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closed,
}

struct Session {
    endpoint: Endpoint,
    writer: Mutex<TransportWriter>,
    demux: Demux,
    reader_task: JoinHandle<()>,
}

impl Session {
    fn is_open(&self) -> bool {
        *self.demux.link.borrow() == LinkState::Open
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_task.abort();
        let abandoned = self.demux.pending.len();
        if abandoned > 0 {
            debug!("Failing {} pending commands on {}", abandoned, self.endpoint);
        }
        self.demux.pending.close(|| LinkError::NotConnected);
        self.demux.link.send_replace(LinkState::Closed);
    }
}

/// Client for the device-control service.
///
/// Created disconnected. `connect()` opens the transport and starts the
/// reader task; `disconnect()` or dropping the client stops it, fails any
/// command still waiting with `NotConnected` and releases the handle.
pub struct DeviceClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    session: Option<Session>,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("endpoint", &self.config.endpoint)
            .field("framing", &self.config.framing)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl DeviceClient {
    /// Create a client that connects through the platform IPC mechanisms.
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(SystemConnector::new(config.connect_timeout));
        Self::with_connector(config, connector)
    }

    /// Create a client with a custom connector.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            session: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the connection and start reading.
    ///
    /// An existing connection is closed first.
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect().await;

        let mut transport = Transport::from_config(&self.config);
        transport.connect_with(self.connector.as_ref()).await?;
        self.attach(transport)
    }

    /// Take over an already connected transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&mut self, transport: Transport) -> Result<()> {
        let endpoint = transport.endpoint().clone();
        let (reader, writer) = transport.into_split()?;

        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let (link, _) = watch::channel(LinkState::Open);
        let demux = Demux {
            pending: PendingTable::new(),
            events,
            link: Arc::new(link),
        };

        let backoff = BackoffConfig::new()
            .with_base_delay(self.config.read_backoff)
            .with_max_delay(self.config.read_backoff_max);
        let reader_task = tokio::spawn(reader::run(reader, demux.clone(), backoff));

        // Replacing a session drops it, which stops its reader.
        self.session = Some(Session {
            endpoint,
            writer: Mutex::new(writer),
            demux,
            reader_task,
        });
        Ok(())
    }

    /// Whether a connection is attached and its reader still sees it open.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_open)
    }

    /// Watch connection liveness. `None` while disconnected.
    pub fn link_state(&self) -> Option<watch::Receiver<LinkState>> {
        self.session.as_ref().map(|s| s.demux.link.subscribe())
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.writer.lock().await.shutdown().await;
            let endpoint = session.endpoint.clone();
            drop(session);
            info!("Disconnected from {}", endpoint);
        }
    }

    /// Send a command and wait for its response.
    ///
    /// `timeout` bounds both writing the command and waiting for the
    /// response. A response with a non-OK status is still returned as a
    /// `Response`; use [`Response::into_result`] to turn it into an error.
    pub async fn send(
        &self,
        command_type: CommandType,
        payload: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Response> {
        self.send_command(codec::new_command(command_type, payload), timeout)
            .await
    }

    /// Send a prepared command and wait for its response.
    ///
    /// The service answers a repeated `commandId` from its response cache,
    /// so resending the same command after a timeout is safe. Sending it
    /// while an earlier send of the same command still waits fails with
    /// `InvalidPayload`.
    pub async fn send_command(&self, command: Command, timeout: Duration) -> Result<Response> {
        let session = self.session.as_ref().ok_or(LinkError::NotConnected)?;
        let bytes = serde_json::to_vec(&command)?;
        let command_id = command.command_id;

        let completion = session.demux.pending.register(&command_id)?;
        let _guard = PendingGuard::new(session.demux.pending.clone(), command_id.clone());

        debug!("Sending {} ({})", command.command_type, command_id);
        let exchange = async {
            session.writer.lock().await.write_frame(&bytes).await?;
            match completion.await {
                Ok(result) => result,
                // The reader dropped the table without answering.
                Err(_) => Err(LinkError::BrokenConnection),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Command {} ({}) timed out after {:?}",
                    command.command_type, command_id, timeout
                );
                Err(LinkError::Timeout(timeout))
            }
        }
    }

    /// Like [`send_command`](Self::send_command), also giving up when
    /// `token` is cancelled.
    ///
    /// A cancelled wait fails with `Cancelled` and releases its pending
    /// entry; a response that arrives later is dropped.
    pub async fn send_command_with_cancel(
        &self,
        command: Command,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Response> {
        let command_id = command.command_id.clone();
        match token
            .run_until_cancelled(self.send_command(command, timeout))
            .await
        {
            Ok(result) => result,
            Err(cancelled) => {
                debug!("Command {} cancelled while waiting", command_id);
                Err(cancelled.into())
            }
        }
    }

    /// Listen for events until `timeout` elapses or the connection closes.
    pub fn listen(&self, timeout: Duration) -> Result<EventListener> {
        self.listen_with_cancel(timeout, CancellationToken::new())
    }

    /// Like [`listen`](Self::listen), also stopping when `token` is cancelled.
    pub fn listen_with_cancel(
        &self,
        timeout: Duration,
        token: CancellationToken,
    ) -> Result<EventListener> {
        let session = self.session.as_ref().ok_or(LinkError::NotConnected)?;
        Ok(EventListener::new(
            session.demux.events.subscribe(),
            session.demux.link.subscribe(),
            timeout,
            token,
        ))
    }

    /// Subscribe to raw events without a deadline.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Event>> {
        let session = self.session.as_ref().ok_or(LinkError::NotConnected)?;
        Ok(session.demux.events.subscribe())
    }
}
