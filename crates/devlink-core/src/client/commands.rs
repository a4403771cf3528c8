//! Typed wrappers for the service's command set.

use super::DeviceClient;
use crate::codec::{CommandType, Response};
use crate::error::{LinkError, Result};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl DeviceClient {
    /// Query the payment terminal state.
    pub async fn payment_status_check(&self, timeout: Duration) -> Result<Response> {
        self.send(CommandType::PaymentStatusCheck, Map::new(), timeout)
            .await
    }

    /// Start a payment of `amount` in the smallest currency unit.
    ///
    /// Non-positive amounts are rejected without contacting the service.
    pub async fn payment_start(&self, amount: i64, timeout: Duration) -> Result<Response> {
        if amount <= 0 {
            return Err(LinkError::InvalidPayload {
                message: format!("amount must be greater than 0, got {}", amount),
            });
        }
        self.send(
            CommandType::PaymentStart,
            payload(json!({ "amount": amount })),
            timeout,
        )
        .await
    }

    pub async fn payment_cancel(&self, timeout: Duration) -> Result<Response> {
        self.send(CommandType::PaymentCancel, Map::new(), timeout).await
    }

    /// Reset the payment terminal to READY.
    pub async fn payment_reset(&self, timeout: Duration) -> Result<Response> {
        self.send(CommandType::PaymentReset, Map::new(), timeout).await
    }

    /// Probe the payment terminal hardware.
    pub async fn payment_device_check(&self, timeout: Duration) -> Result<Response> {
        self.send(CommandType::PaymentDeviceCheck, Map::new(), timeout)
            .await
    }

    pub async fn camera_capture(&self, timeout: Duration) -> Result<Response> {
        self.send(CommandType::CameraCapture, Map::new(), timeout).await
    }

    /// Print the image at `image_path`.
    pub async fn printer_print(
        &self,
        image_path: impl AsRef<Path>,
        timeout: Duration,
    ) -> Result<Response> {
        let path = image_path.as_ref().to_string_lossy();
        if path.is_empty() {
            return Err(LinkError::InvalidPayload {
                message: "imagePath is required".to_string(),
            });
        }
        self.send(
            CommandType::PrinterPrint,
            payload(json!({ "imagePath": path })),
            timeout,
        )
        .await
    }

    /// Request a state snapshot. An empty list asks for every device.
    pub async fn snapshot(&self, device_types: &[&str], timeout: Duration) -> Result<Response> {
        self.send(
            CommandType::SnapshotRequest,
            payload(json!({ "deviceTypes": device_types })),
            timeout,
        )
        .await
    }
}
