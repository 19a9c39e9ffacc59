//! Account and device operations

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{Result, Transport, TransportError, TransportRequest, TransportResponse};

/// Registered device as listed by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    #[serde(default)]
    pub last_lat: Option<f64>,
    #[serde(default)]
    pub last_lng: Option<f64>,
    #[serde(default)]
    pub last_update: Option<String>,
}

/// Fully qualified endpoint URLs
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub devices: String,
    pub command: String,
    pub login: String,
    pub signup: String,
    pub add_device: String,
}

/// Client for the non-reporting endpoints
pub struct BackendClient {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints, timeout: Duration) -> Self {
        Self {
            transport,
            endpoints,
            timeout,
        }
    }

    async fn exchange(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.transport.send(request.with_timeout(self.timeout)).await
    }

    /// Log in and return the issued token
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        self.authenticate(&self.endpoints.login, email, password)
            .await
    }

    /// Create an account and return the issued token
    pub async fn signup(&self, email: &str, password: &str) -> Result<String> {
        self.authenticate(&self.endpoints.signup, email, password)
            .await
    }

    async fn authenticate(&self, url: &str, email: &str, password: &str) -> Result<String> {
        let request =
            TransportRequest::post_json(url, json!({ "email": email, "password": password }));
        let response = self.exchange(request).await?;

        if !response.is_success() {
            return Err(TransportError::Status(response.status));
        }

        let body = response
            .json()
            .ok_or_else(|| TransportError::Malformed("empty auth response".to_string()))?;

        match body["token"].as_str().filter(|t| !t.is_empty()) {
            Some(token) => {
                info!("◆ AUTHENTICATED AS {}", email);
                Ok(token.to_string())
            }
            None => {
                let message = body["message"].as_str().unwrap_or("Invalid response");
                Err(TransportError::Rejected(message.to_string()))
            }
        }
    }

    /// Register this device under the account behind `token`
    pub async fn register_device(&self, token: Option<&str>, name: &str) -> Result<Device> {
        let payload = json!({
            "name": name,
            "last_lat": Value::Null,
            "last_lng": Value::Null,
            "last_update": Value::Null,
        });
        let request =
            TransportRequest::post_json(&self.endpoints.add_device, payload).with_bearer(token);
        let response = self.exchange(request).await?;

        if !response.is_success() {
            return Err(TransportError::Status(response.status));
        }

        let device: Device = serde_json::from_str(&response.body)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        info!("◆ DEVICE REGISTERED: {} ({})", device.name, device.id);
        Ok(device)
    }

    /// Devices owned by the account behind `token`
    pub async fn fetch_devices(&self, token: Option<&str>) -> Result<Vec<Device>> {
        let request = TransportRequest::get(&self.endpoints.devices).with_bearer(token);
        let response = self.exchange(request).await?;

        if !response.is_success() {
            return Err(TransportError::Status(response.status));
        }
        if response.body.trim().is_empty() {
            return Err(TransportError::Malformed("empty device list".to_string()));
        }

        serde_json::from_str(&response.body).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// Queue a command for another device; returns whether the backend accepted it
    pub async fn send_device_command(
        &self,
        token: Option<&str>,
        device_id: &str,
        command: Value,
    ) -> Result<bool> {
        let url = format!("{}/{}", self.endpoints.command.trim_end_matches('/'), device_id);
        let request = TransportRequest::post_json(url, command).with_bearer(token);
        let response = self.exchange(request).await?;

        if !response.is_success() {
            warn!("◆ COMMAND FOR {} REFUSED: HTTP {}", device_id, response.status);
        }
        Ok(response.is_success())
    }
}
