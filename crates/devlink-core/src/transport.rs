//! Duplex byte-stream transport to the device-control service.
//!
//! A `Transport` owns one connection handle and exposes framed read/write
//! primitives on it. The concrete stream comes from a [`Connector`]; the
//! system connector supports Windows named pipes, Unix domain sockets and
//! loopback TCP. Tests plug in in-memory streams through the same trait.

use crate::backoff::{retry_async, BackoffConfig};
use crate::codec::{self, write_frame, Envelope, FrameReader, Framing};
use crate::config::{ClientConfig, ProtocolConfig, TimingConfig};
use crate::error::{LinkError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, info, trace};

/// Windows `ERROR_PIPE_BUSY`: all server instances are in use.
const OS_ERROR_PIPE_BUSY: i32 = 231;

/// Address of the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// Windows named pipe, e.g. `\\.\pipe\DeviceControllerService`.
    Pipe(String),
    /// Unix domain socket path.
    Unix(PathBuf),
    /// `host:port`, normally loopback.
    Tcp(String),
}

impl Endpoint {
    /// Parse an endpoint string.
    ///
    /// - `\\.\pipe\NAME` or `pipe:NAME` → named pipe
    /// - `tcp://HOST:PORT` → TCP
    /// - `unix://PATH` or any other non-empty string → Unix socket path
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        let lower = s.to_lowercase();
        if lower.starts_with(r"\\.\pipe\") || lower.starts_with(r"\\?\pipe\") {
            return Some(Endpoint::Pipe(s.to_string()));
        }
        if let Some(name) = s.strip_prefix("pipe:") {
            if name.is_empty() {
                return None;
            }
            return Some(Endpoint::Pipe(format!(r"\\.\pipe\{}", name)));
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.is_empty() {
                return None;
            }
            return Some(Endpoint::Tcp(addr.to_string()));
        }
        let path = s.strip_prefix("unix://").unwrap_or(s);
        if path.is_empty() {
            return None;
        }
        Some(Endpoint::Unix(PathBuf::from(path)))
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        if cfg!(windows) {
            Endpoint::Pipe(ProtocolConfig::DEFAULT_PIPE_NAME.to_string())
        } else {
            Endpoint::Unix(PathBuf::from(ProtocolConfig::DEFAULT_SOCKET_PATH))
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Pipe(name) => write!(f, "{}", name),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Endpoint::parse(&s).ok_or_else(|| format!("invalid endpoint '{}'", s))
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Any reliable duplex byte stream.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> DuplexStream for T {}

/// Type-erased connection handle.
pub type BoxedStream = Box<dyn DuplexStream>;

/// Opens raw streams to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream>;
}

/// Connector for the platform's real IPC mechanisms.
#[derive(Debug, Clone)]
pub struct SystemConnector {
    connect_timeout: Duration,
}

impl SystemConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SystemConnector {
    fn default() -> Self {
        Self::new(TimingConfig::CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector for SystemConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream> {
        let attempt = open_stream(endpoint, self.connect_timeout);
        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(result) => result.map_err(|e| LinkError::connect_failed(endpoint, e)),
            Err(_) => Err(LinkError::connect_failed(
                endpoint,
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", self.connect_timeout),
                ),
            )),
        }
    }
}

async fn open_stream(endpoint: &Endpoint, connect_timeout: Duration) -> std::io::Result<BoxedStream> {
    match endpoint {
        Endpoint::Pipe(name) => {
            let attempts = (connect_timeout.as_millis()
                / TimingConfig::PIPE_BUSY_BACKOFF.as_millis().max(1))
            .clamp(1, u32::MAX as u128) as u32;
            let config = BackoffConfig::fixed(TimingConfig::PIPE_BUSY_BACKOFF)
                .with_max_attempts(attempts)
                .with_jitter(true);
            retry_async(&config, || open_pipe(name), is_pipe_busy).await
        }
        Endpoint::Unix(path) => open_unix(path).await,
        Endpoint::Tcp(addr) => {
            let stream = tokio::net::TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
    }
}

fn is_pipe_busy(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(OS_ERROR_PIPE_BUSY)
}

#[cfg(windows)]
async fn open_pipe(name: &str) -> std::io::Result<BoxedStream> {
    use tokio::net::windows::named_pipe::ClientOptions;

    // Byte read mode: the framing layer finds message boundaries itself.
    let client = ClientOptions::new().open(name)?;
    Ok(Box::new(client))
}

#[cfg(not(windows))]
async fn open_pipe(name: &str) -> std::io::Result<BoxedStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("named pipe {} is only available on Windows", name),
    ))
}

#[cfg(unix)]
async fn open_unix(path: &std::path::Path) -> std::io::Result<BoxedStream> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn open_unix(path: &std::path::Path) -> std::io::Result<BoxedStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("unix socket {} is not available on this platform", path.display()),
    ))
}

/// Read side of a connected transport.
pub struct TransportReader {
    frames: FrameReader<ReadHalf<BoxedStream>>,
}

impl TransportReader {
    /// Read one frame. A closed stream is `BrokenConnection`.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        match self.frames.read_frame().await? {
            Some(frame) => {
                trace!("Read frame of {} bytes", frame.len());
                Ok(frame)
            }
            None => Err(LinkError::BrokenConnection),
        }
    }

    /// Read and decode one envelope.
    pub async fn read_envelope(&mut self) -> Result<Envelope> {
        let frame = self.read_frame().await?;
        codec::decode(&frame)
    }
}

/// Write side of a connected transport.
pub struct TransportWriter {
    writer: WriteHalf<BoxedStream>,
    framing: Framing,
    max_message_size: usize,
}

impl TransportWriter {
    /// Write one frame.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_message_size {
            return Err(LinkError::FrameTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }
        write_frame(&mut self.writer, self.framing, payload).await?;
        trace!("Wrote frame of {} bytes", payload.len());
        Ok(())
    }

    /// Close the write direction. Errors are ignored; the peer may be gone.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Transport shutdown: {}", e);
        }
    }
}

/// Connection handle with explicit lifecycle.
///
/// Created disconnected; `connect()` opens the handle, `disconnect()` or
/// dropping the value releases it.
pub struct Transport {
    endpoint: Endpoint,
    framing: Framing,
    max_message_size: usize,
    halves: Option<(TransportReader, TransportWriter)>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("framing", &self.framing)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Transport {
    /// Create a disconnected transport for `endpoint`.
    pub fn new(endpoint: Endpoint, framing: Framing) -> Self {
        Self {
            endpoint,
            framing,
            max_message_size: ProtocolConfig::MAX_MESSAGE_SIZE,
            halves: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let mut transport = Self::new(config.endpoint.clone(), config.framing);
        transport.max_message_size = config.max_message_size;
        transport
    }

    /// Wrap an already open stream.
    pub fn from_stream(endpoint: Endpoint, framing: Framing, stream: impl DuplexStream) -> Self {
        let mut transport = Self::new(endpoint, framing);
        transport.attach(Box::new(stream));
        transport
    }

    /// Connect using the platform connector.
    pub async fn connect(&mut self, connect_timeout: Duration) -> Result<()> {
        self.connect_with(&SystemConnector::new(connect_timeout)).await
    }

    /// Connect using a specific connector. Reconnecting drops the old handle.
    pub async fn connect_with(&mut self, connector: &dyn Connector) -> Result<()> {
        if self.is_connected() {
            self.disconnect().await;
        }
        let stream = connector.connect(&self.endpoint).await?;
        self.attach(stream);
        info!("Connected to {}", self.endpoint);
        Ok(())
    }

    fn attach(&mut self, stream: BoxedStream) {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = TransportReader {
            frames: FrameReader::with_max_size(read_half, self.framing, self.max_message_size),
        };
        let writer = TransportWriter {
            writer: write_half,
            framing: self.framing,
            max_message_size: self.max_message_size,
        };
        self.halves = Some((reader, writer));
    }

    pub fn is_connected(&self) -> bool {
        self.halves.is_some()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let (_, writer) = self.halves.as_mut().ok_or(LinkError::NotConnected)?;
        writer.write_frame(payload).await
    }

    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let (reader, _) = self.halves.as_mut().ok_or(LinkError::NotConnected)?;
        reader.read_frame().await
    }

    pub async fn read_envelope(&mut self) -> Result<Envelope> {
        let (reader, _) = self.halves.as_mut().ok_or(LinkError::NotConnected)?;
        reader.read_envelope().await
    }

    /// Release the handle. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some((_reader, mut writer)) = self.halves.take() {
            writer.shutdown().await;
            info!("Disconnected from {}", self.endpoint);
        }
    }

    /// Hand both halves to separate owners.
    pub fn into_split(mut self) -> Result<(TransportReader, TransportWriter)> {
        self.halves.take().ok_or(LinkError::NotConnected)
    }
}
