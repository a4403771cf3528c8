//! Envelope types exchanged with the device-control service.
//!
//! Every message on the wire is one JSON object. Commands flow from the
//! client, responses and events flow from the service.

use crate::config::ProtocolConfig;
use crate::error::LinkError;
use crate::state::DeviceState;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Discriminator carried in the `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Command,
    Response,
    Event,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Response => "response",
            MessageKind::Event => "event",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "command" => Some(MessageKind::Command),
            "response" => Some(MessageKind::Response),
            "event" => Some(MessageKind::Event),
            _ => None,
        }
    }
}

/// Command types understood by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    PaymentStatusCheck,
    PaymentStart,
    PaymentCancel,
    PaymentReset,
    PaymentDeviceCheck,
    CameraCapture,
    PrinterPrint,
    SnapshotRequest,
}

impl CommandType {
    pub const ALL: [CommandType; 8] = [
        CommandType::PaymentStatusCheck,
        CommandType::PaymentStart,
        CommandType::PaymentCancel,
        CommandType::PaymentReset,
        CommandType::PaymentDeviceCheck,
        CommandType::CameraCapture,
        CommandType::PrinterPrint,
        CommandType::SnapshotRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::PaymentStatusCheck => "payment_status_check",
            CommandType::PaymentStart => "payment_start",
            CommandType::PaymentCancel => "payment_cancel",
            CommandType::PaymentReset => "payment_reset",
            CommandType::PaymentDeviceCheck => "payment_device_check",
            CommandType::CameraCapture => "camera_capture",
            CommandType::PrinterPrint => "printer_print",
            CommandType::SnapshotRequest => "snapshot_request",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A command sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    pub kind: MessageKind,
    pub command_id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub timestamp_ms: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: Map<String, Value>,
}

impl Command {
    /// The typed command, if `type` is one the service knows.
    pub fn known_type(&self) -> Option<CommandType> {
        CommandType::from_str(&self.command_type)
    }
}

/// Response status reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseStatus {
    Ok,
    Error,
    Rejected,
    Failed,
    Other(String),
}

impl ResponseStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::Error => "ERROR",
            ResponseStatus::Rejected => "REJECTED",
            ResponseStatus::Failed => "FAILED",
            ResponseStatus::Other(s) => s,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseStatus::Ok)
    }
}

/// A response without a status is not a success.
impl Default for ResponseStatus {
    fn default() -> Self {
        ResponseStatus::Other(String::new())
    }
}

impl From<String> for ResponseStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "OK" => ResponseStatus::Ok,
            "ERROR" => ResponseStatus::Error,
            "REJECTED" => ResponseStatus::Rejected,
            "FAILED" => ResponseStatus::Failed,
            _ => ResponseStatus::Other(s),
        }
    }
}

impl From<ResponseStatus> for String {
    fn from(status: ResponseStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error record attached to a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ServiceError {
    pub const DEVICE_NOT_FOUND: &'static str = "DEVICE_NOT_FOUND";
    pub const DEVICE_NOT_READY: &'static str = "DEVICE_NOT_READY";
    pub const INVALID_PAYLOAD: &'static str = "INVALID_PAYLOAD";
    pub const COMMAND_REJECTED: &'static str = "COMMAND_REJECTED";
    pub const PROCESSING_ERROR: &'static str = "PROCESSING_ERROR";
    pub const RESET_FAILED: &'static str = "RESET_FAILED";
    pub const UNKNOWN_COMMAND: &'static str = "UNKNOWN_COMMAND";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A response correlated to a command by `commandId`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub command_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub result: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl Response {
    /// Create a success response.
    pub fn ok(command_id: impl Into<String>, result: Map<String, Value>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            command_id: Some(command_id.into()),
            result,
            ..Default::default()
        }
    }

    /// Create a failed response.
    pub fn failed(command_id: impl Into<String>, error: ServiceError) -> Self {
        Self {
            status: ResponseStatus::Failed,
            command_id: Some(command_id.into()),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok() && self.error.is_none()
    }

    /// Device state from `result.state`, if present.
    pub fn state(&self) -> Option<DeviceState> {
        DeviceState::from_fields(&self.result)
    }

    /// Get the result, returning an error if the service reported a failure.
    pub fn into_result(self) -> Result<Map<String, Value>, LinkError> {
        if let Some(err) = self.error {
            return Err(LinkError::Service {
                code: err.code,
                message: err.message,
            });
        }
        if !self.status.is_ok() {
            let message = if self.status.as_str().is_empty() {
                "response carries no status"
            } else {
                "service reported a non-OK status"
            };
            return Err(LinkError::Service {
                code: self.status.as_str().to_string(),
                message: message.to_string(),
            });
        }
        Ok(self.result)
    }
}

/// Event categories published by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PaymentStateChanged,
    PaymentComplete,
    PaymentFailed,
    PaymentCancelled,
    PaymentError,
    DeviceStateChanged,
    PrinterJobComplete,
    CameraCaptureComplete,
    SystemStatusCheck,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::PaymentStateChanged => "payment_state_changed",
            EventType::PaymentComplete => "payment_complete",
            EventType::PaymentFailed => "payment_failed",
            EventType::PaymentCancelled => "payment_cancelled",
            EventType::PaymentError => "payment_error",
            EventType::DeviceStateChanged => "device_state_changed",
            EventType::PrinterJobComplete => "printer_job_complete",
            EventType::CameraCaptureComplete => "camera_capture_complete",
            EventType::SystemStatusCheck => "system_status_check",
            EventType::Other(s) => s,
        }
    }
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Other(String::new())
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "payment_state_changed" => EventType::PaymentStateChanged,
            "payment_complete" => EventType::PaymentComplete,
            "payment_failed" => EventType::PaymentFailed,
            "payment_cancelled" => EventType::PaymentCancelled,
            "payment_error" => EventType::PaymentError,
            "device_state_changed" => EventType::DeviceStateChanged,
            "printer_job_complete" => EventType::PrinterJobComplete,
            "camera_capture_complete" => EventType::CameraCaptureComplete,
            "system_status_check" => EventType::SystemStatusCheck,
            _ => EventType::Other(s),
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An unsolicited event frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Map<String, Value>,
}

impl Event {
    /// Device state from `data.state`, if present.
    pub fn state(&self) -> Option<DeviceState> {
        DeviceState::from_fields(&self.data)
    }
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Command(Command),
    Response(Response),
    Event(Event),
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::Command(_) => MessageKind::Command,
            Envelope::Response(_) => MessageKind::Response,
            Envelope::Event(_) => MessageKind::Event,
        }
    }

    /// Correlation id, absent for events.
    pub fn command_id(&self) -> Option<&str> {
        match self {
            Envelope::Command(c) => Some(&c.command_id),
            Envelope::Response(r) => r.command_id.as_deref(),
            Envelope::Event(_) => None,
        }
    }

    /// Serialize back to a JSON value, including the `kind` field.
    pub fn to_value(&self) -> Result<Value, LinkError> {
        let (kind, mut value) = match self {
            Envelope::Command(c) => (MessageKind::Command, serde_json::to_value(c)?),
            Envelope::Response(r) => (MessageKind::Response, serde_json::to_value(r)?),
            Envelope::Event(e) => (MessageKind::Event, serde_json::to_value(e)?),
        };
        if let Value::Object(map) = &mut value {
            map.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
        }
        Ok(value)
    }
}

fn default_protocol_version() -> String {
    ProtocolConfig::PROTOCOL_VERSION.to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_type_names() {
        for t in CommandType::ALL {
            assert_eq!(CommandType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(CommandType::from_str("payment_refund"), None);
    }

    #[test]
    fn test_response_status_strings() {
        let status: ResponseStatus = serde_json::from_value(json!("REJECTED")).unwrap();
        assert_eq!(status, ResponseStatus::Rejected);

        let status: ResponseStatus = serde_json::from_value(json!("PENDING")).unwrap();
        assert_eq!(status, ResponseStatus::Other("PENDING".into()));
        assert_eq!(serde_json::to_value(&status).unwrap(), json!("PENDING"));
    }

    #[test]
    fn test_response_null_fields() {
        let response: Response = serde_json::from_value(json!({
            "status": "OK",
            "commandId": "abc",
            "result": null,
            "error": null
        }))
        .unwrap();

        assert!(response.is_ok());
        assert!(response.result.is_empty());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_into_result_on_failure() {
        let response = Response::failed(
            "abc",
            ServiceError::new(ServiceError::DEVICE_NOT_FOUND, "No payment terminal available"),
        );
        match response.into_result().unwrap_err() {
            LinkError::Service { code, message } => {
                assert_eq!(code, "DEVICE_NOT_FOUND");
                assert_eq!(message, "No payment terminal available");
            }
            other => panic!("Expected Service error, got: {:?}", other),
        }
    }

    #[test]
    fn test_into_result_on_error_status_without_record() {
        let response = Response {
            status: ResponseStatus::Error,
            command_id: Some("abc".into()),
            ..Default::default()
        };
        assert!(!response.is_ok());
        assert!(response.into_result().is_err());
    }

    #[test]
    fn test_response_without_status_is_not_ok() {
        let response: Response = serde_json::from_value(json!({"commandId": "x"})).unwrap();
        assert!(!response.is_ok());
        assert_eq!(response.status, ResponseStatus::Other(String::new()));
        match response.into_result().unwrap_err() {
            LinkError::Service { code, message } => {
                assert!(code.is_empty());
                assert_eq!(message, "response carries no status");
            }
            other => panic!("Expected Service error, got: {:?}", other),
        }
    }

    #[test]
    fn test_event_type_other_preserved() {
        let event: Event = serde_json::from_value(json!({
            "eventType": "coin_inserted",
            "deviceType": "bill",
            "data": {"value": 500}
        }))
        .unwrap();
        assert_eq!(event.event_type, EventType::Other("coin_inserted".into()));
        assert_eq!(event.data["value"], json!(500));
    }

    #[test]
    fn test_envelope_to_value_includes_kind() {
        let envelope = Envelope::Response(Response::ok("abc", Map::new()));
        let value = envelope.to_value().unwrap();
        assert_eq!(value["kind"], json!("response"));
        assert_eq!(value["commandId"], json!("abc"));
    }
}
