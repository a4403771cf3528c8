//! Device state codes reported by the service.

use serde_json::{Map, Value};

/// Terminal device state carried in response `result.state` and event
/// `data.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Ready,
    Processing,
    Error,
    Hung,
    Unknown(i64),
}

impl DeviceState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => DeviceState::Disconnected,
            1 => DeviceState::Connecting,
            2 => DeviceState::Ready,
            3 => DeviceState::Processing,
            4 => DeviceState::Error,
            5 => DeviceState::Hung,
            n => DeviceState::Unknown(n),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            DeviceState::Disconnected => 0,
            DeviceState::Connecting => 1,
            DeviceState::Ready => 2,
            DeviceState::Processing => 3,
            DeviceState::Error => 4,
            DeviceState::Hung => 5,
            DeviceState::Unknown(n) => *n,
        }
    }

    /// Read a `state` field from a result or event data map.
    ///
    /// The service writes the code either as a JSON integer or, in some
    /// events, as a decimal string.
    pub fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        match fields.get("state")? {
            Value::Number(n) => n.as_i64().map(Self::from_code),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Self::from_code),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Disconnected => write!(f, "DISCONNECTED"),
            DeviceState::Connecting => write!(f, "CONNECTING"),
            DeviceState::Ready => write!(f, "READY"),
            DeviceState::Processing => write!(f, "PROCESSING"),
            DeviceState::Error => write!(f, "ERROR"),
            DeviceState::Hung => write!(f, "HUNG"),
            DeviceState::Unknown(n) => write!(f, "UNKNOWN({})", n),
        }
    }
}

/// Display name for a raw state code.
pub fn state_name(code: i64) -> String {
    DeviceState::from_code(code).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_names() {
        assert_eq!(state_name(2), "READY");
        assert_eq!(state_name(99), "UNKNOWN(99)");
        assert_eq!(state_name(-1), "UNKNOWN(-1)");
    }

    #[test]
    fn test_code_roundtrip() {
        for code in 0..=5 {
            assert_eq!(DeviceState::from_code(code).code(), code);
        }
        assert_eq!(DeviceState::from_code(42), DeviceState::Unknown(42));
    }

    #[test]
    fn test_from_fields_accepts_numeric_strings() {
        let fields = json!({"state": 3});
        assert_eq!(
            DeviceState::from_fields(fields.as_object().unwrap()),
            Some(DeviceState::Processing)
        );

        let fields = json!({"state": "4"});
        assert_eq!(
            DeviceState::from_fields(fields.as_object().unwrap()),
            Some(DeviceState::Error)
        );

        let fields = json!({"state": "busy"});
        assert_eq!(DeviceState::from_fields(fields.as_object().unwrap()), None);

        let fields = json!({});
        assert_eq!(DeviceState::from_fields(fields.as_object().unwrap()), None);
    }
}
