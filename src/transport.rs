use crate::error::TransportError;
use crate::metrics::CollectionResult;
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Path the payload is posted to, relative to the API host
pub const SUBMIT_PATH: &str = "/api/system/v2/";

/// Everything gathered in one collection cycle
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Payload {
    pub collected_at: DateTime<Utc>,
    pub machine_id: Option<String>,
    pub server_key: Option<String>,
    pub system: serde_json::Value,
    pub processes: serde_json::Value,
    pub host: serde_json::Value,
    pub plugins: CollectionResult,
}

impl Payload {
    /// Empty payload stamped with the current time
    pub fn new(machine_id: Option<String>, server_key: Option<String>) -> Self {
        Self {
            collected_at: Utc::now(),
            machine_id,
            server_key,
            system: serde_json::Value::Null,
            processes: serde_json::Value::Null,
            host: serde_json::Value::Null,
            plugins: CollectionResult::new(),
        }
    }

    /// Place a collector's output in the slot named after it; unknown names are dropped
    pub fn set_slot(&mut self, name: &str, value: serde_json::Value) {
        match name {
            "system" => self.system = value,
            "processes" => self.processes = value,
            "host" => self.host = value,
            other => debug!("No payload slot for collector '{}'", other),
        }
    }
}

/// Delivers payloads to the remote collector
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Deliver one payload. With `debug` set the payload is also echoed to stdout.
    fn send(&self, payload: &Payload, debug: bool) -> Result<(), TransportError>;
}

/// JSON-over-HTTP transport
///
/// Owns a current-thread tokio runtime so callers stay synchronous.
pub struct HttpTransport {
    client: Client,
    runtime: Runtime,
    api_host: String,
    server_key: Option<String>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    ///
    /// # Arguments
    ///
    /// * `api_host` - Collector base URL (e.g., "https://collector.local")
    /// * `server_key` - Sent as the `api_key` query parameter when set
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the client can't be built and
    /// `TransportError::Runtime` if the tokio runtime can't be created.
    pub fn new(
        api_host: &str,
        server_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create HTTP client: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;

        Ok(Self {
            client,
            runtime,
            api_host: api_host.to_string(),
            server_key,
        })
    }

    /// Full submit URL
    pub fn submit_url(&self) -> String {
        format!("{}{}", self.api_host.trim_end_matches('/'), SUBMIT_PATH)
    }

    async fn post(&self, body: String) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(self.submit_url())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(key) = &self.server_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Collector accepted payload with status {}", status);
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn send(&self, payload: &Payload, debug: bool) -> Result<(), TransportError> {
        if debug {
            println!("{}", serde_json::to_string_pretty(payload)?);
        }

        let body = serde_json::to_string(payload)?;
        info!("Sending {} bytes to {}", body.len(), self.submit_url());
        self.runtime.block_on(self.post(body))
    }
}
