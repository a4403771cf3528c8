//! Message framing over a byte stream.
//!
//! Two framings are supported:
//!
//! ```text
//! Json:            {...}{...}   one self-delimiting JSON value per message
//! LengthPrefixed:  [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! `Json` is what the device-control service speaks natively. The reader
//! buffers input and cuts it at JSON value boundaries, so it does not depend
//! on one read call returning exactly one message.

use crate::config::ProtocolConfig;
use crate::error::{LinkError, Result};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// How message boundaries are marked on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Framing {
    /// Back-to-back JSON objects with no delimiter.
    #[default]
    Json,
    /// 4-byte big-endian length prefix before each payload.
    LengthPrefixed,
}

impl Framing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framing::Json => "json",
            Framing::LengthPrefixed => "length-prefixed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Framing::Json),
            "length-prefixed" | "length_prefixed" | "lengthprefixed" => {
                Some(Framing::LengthPrefixed)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reads whole frames from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    framing: Framing,
    max_size: usize,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, framing: Framing) -> Self {
        Self::with_max_size(inner, framing, ProtocolConfig::MAX_MESSAGE_SIZE)
    }

    pub fn with_max_size(inner: R, framing: Framing, max_size: usize) -> Self {
        Self {
            inner,
            framing,
            max_size,
            buf: Vec::new(),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Read the next frame.
    ///
    /// Returns `None` on clean EOF (peer closed connection). A stream that
    /// ends in the middle of a frame also yields `None`; the partial bytes
    /// are dropped.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.framing {
            Framing::LengthPrefixed => self.read_length_prefixed().await,
            Framing::Json => self.read_json().await,
        }
    }

    async fn read_length_prefixed(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_size {
            return Err(LinkError::FrameTooLarge {
                size: len,
                max: self.max_size,
            });
        }

        let mut payload = vec![0u8; len];
        match self.inner.read_exact(&mut payload).await {
            Ok(_) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_json(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; ProtocolConfig::READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = self.split_json()? {
                if frame.len() > self.max_size {
                    return Err(LinkError::FrameTooLarge {
                        size: frame.len(),
                        max: self.max_size,
                    });
                }
                return Ok(Some(frame));
            }

            if self.buf.len() > self.max_size {
                let size = self.buf.len();
                self.buf.clear();
                return Err(LinkError::FrameTooLarge {
                    size,
                    max: self.max_size,
                });
            }

            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if !self.buf.iter().all(u8::is_ascii_whitespace) {
                    trace!("Dropping {} bytes of truncated frame at EOF", self.buf.len());
                }
                self.buf.clear();
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Cut one complete JSON value off the front of the buffer.
    fn split_json(&mut self) -> Result<Option<Vec<u8>>> {
        let start = match self.buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(start) => start,
            None => {
                self.buf.clear();
                return Ok(None);
            }
        };

        let mut values =
            serde_json::Deserializer::from_slice(&self.buf[start..]).into_iter::<IgnoredAny>();
        match values.next() {
            Some(Ok(_)) => {
                let end = start + values.byte_offset();
                let frame = self.buf[start..end].to_vec();
                self.buf.drain(..end);
                Ok(Some(frame))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => {
                // Drop the bad bytes up to the next object start; anything
                // after it stays buffered.
                match self.buf[start + 1..].iter().position(|&b| b == b'{') {
                    Some(offset) => {
                        self.buf.drain(..start + 1 + offset);
                    }
                    None => self.buf.clear(),
                }
                Err(e.into())
            }
            None => Ok(None),
        }
    }
}

/// Write one frame to an async writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    framing: Framing,
    payload: &[u8],
) -> Result<()> {
    if framing == Framing::LengthPrefixed {
        let len = u32::try_from(payload.len()).map_err(|_| LinkError::FrameTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;
        writer.write_all(&len.to_be_bytes()).await?;
    }
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_length_prefixed_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, Framing::LengthPrefixed, b"{\"a\":1}")
            .await
            .unwrap();

        let mut reader = FrameReader::new(Cursor::new(buf), Framing::LengthPrefixed);
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame, Some(b"{\"a\":1}".to_vec()));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_length_prefixed_oversized_returns_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(1024u32).to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut reader = FrameReader::with_max_size(Cursor::new(buf), Framing::LengthPrefixed, 16);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, LinkError::FrameTooLarge { size: 1024, max: 16 }));
    }

    #[tokio::test]
    async fn test_json_splits_coalesced_frames() {
        let input = b"{\"kind\":\"event\"}  {\"status\":\"OK\",\"result\":{\"s\":\"}{\"}}\n".to_vec();
        let mut reader = FrameReader::new(Cursor::new(input), Framing::Json);

        let first = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first, b"{\"kind\":\"event\"}".to_vec());

        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(second, b"{\"status\":\"OK\",\"result\":{\"s\":\"}{\"}}".to_vec());

        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_reassembles_split_frame() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, Framing::Json);

        let writer = tokio::spawn(async move {
            tx.write_all(b"{\"status\":").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.write_all(b"\"OK\"}").await.unwrap();
        });

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, b"{\"status\":\"OK\"}".to_vec());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_json_garbage_is_decode_error_then_recovers() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(rx, Framing::Json);

        tx.write_all(b"not json").await.unwrap();
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, LinkError::Decode { .. }));

        tx.write_all(b"{\"ok\":true}").await.unwrap();
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, b"{\"ok\":true}".to_vec());
    }

    #[tokio::test]
    async fn test_json_garbage_keeps_frame_in_same_read() {
        let input = b"not json{\"a\":1}".to_vec();
        let mut reader = FrameReader::new(Cursor::new(input), Framing::Json);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, LinkError::Decode { .. }));

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, b"{\"a\":1}".to_vec());
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_broken_object_resyncs_on_next_object() {
        let input = b"{\"a\":]}{\"b\":2}".to_vec();
        let mut reader = FrameReader::new(Cursor::new(input), Framing::Json);

        assert!(reader.read_frame().await.is_err());
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, b"{\"b\":2}".to_vec());
    }

    #[tokio::test]
    async fn test_json_oversized_returns_error() {
        let input = format!("{{\"data\":\"{}\"}}", "x".repeat(64));
        let mut reader = FrameReader::with_max_size(Cursor::new(input.into_bytes()), Framing::Json, 16);
        assert!(matches!(
            reader.read_frame().await.unwrap_err(),
            LinkError::FrameTooLarge { .. }
        ));
    }

    #[tokio::test]
    async fn test_json_empty_stream_returns_none() {
        let mut reader = FrameReader::new(Cursor::new(b"  \n".to_vec()), Framing::Json);
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[test]
    fn test_framing_names() {
        assert_eq!(Framing::from_str("json"), Some(Framing::Json));
        assert_eq!(Framing::from_str("Length-Prefixed"), Some(Framing::LengthPrefixed));
        assert_eq!(Framing::from_str("xml"), None);
        assert_eq!(Framing::default(), Framing::Json);
    }
}
