//! Envelope codec.
//!
//! Turns commands into wire bytes and wire bytes into [`Envelope`]s. The
//! codec only knows the envelope fields; payload, result and data objects
//! are carried through untouched since their shape depends on the type.

mod envelope;
mod framing;

pub use envelope::{
    Command, CommandType, Envelope, Event, EventType, MessageKind, Response, ResponseStatus,
    ServiceError,
};
pub use framing::{write_frame, FrameReader, Framing};

use crate::config::ProtocolConfig;
use crate::error::{LinkError, Result};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Build a command with a fresh `commandId` and the current timestamp.
pub fn new_command(command_type: CommandType, payload: Map<String, Value>) -> Command {
    Command {
        protocol_version: ProtocolConfig::PROTOCOL_VERSION.to_string(),
        kind: MessageKind::Command,
        command_id: Uuid::new_v4().to_string(),
        command_type: command_type.as_str().to_string(),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        payload,
    }
}

/// Build a command and serialize it to UTF-8 JSON.
pub fn encode_command(
    command_type: CommandType,
    payload: Map<String, Value>,
) -> Result<(Command, Vec<u8>)> {
    let command = new_command(command_type, payload);
    let bytes = serde_json::to_vec(&command)?;
    Ok((command, bytes))
}

/// Parse one frame into an envelope.
///
/// A frame without `kind` is a response; services omit it there.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let value: Value = serde_json::from_slice(bytes)?;
    let kind = match &value {
        Value::Object(map) => match map.get("kind") {
            None | Some(Value::Null) => MessageKind::Response,
            Some(Value::String(s)) => MessageKind::from_str(s)
                .ok_or_else(|| LinkError::decode(format!("unknown message kind '{}'", s)))?,
            Some(other) => {
                return Err(LinkError::decode(format!("invalid kind field: {}", other)));
            }
        },
        other => {
            return Err(LinkError::decode(format!(
                "expected a JSON object, got {}",
                json_type_name(other)
            )));
        }
    };

    let envelope = match kind {
        MessageKind::Command => Envelope::Command(serde_json::from_value(value)?),
        MessageKind::Response => Envelope::Response(serde_json::from_value(value)?),
        MessageKind::Event => Envelope::Event(serde_json::from_value(value)?),
    };

    if let Some(version) = envelope_version(&envelope) {
        if version != ProtocolConfig::PROTOCOL_VERSION {
            tracing::debug!(
                "Peer protocol version {} differs from {}",
                version,
                ProtocolConfig::PROTOCOL_VERSION
            );
        }
    }

    Ok(envelope)
}

fn envelope_version(envelope: &Envelope) -> Option<&str> {
    match envelope {
        Envelope::Command(c) => Some(&c.protocol_version),
        Envelope::Response(r) => r.protocol_version.as_deref(),
        Envelope::Event(e) => e.protocol_version.as_deref(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
