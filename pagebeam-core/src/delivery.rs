//! HTTP delivery of event records to the collection endpoint
//!
//! The client POSTs one flattened JSON payload per event. Every failure mode
//! (network, non-2xx status, serialization) is converted into a
//! [`DeliveryResult`]; [`DeliveryClient::send`] itself never errors, so
//! nothing can propagate into the host's event-handling path.
//!
//! Outside production the client logs the would-be payload and reports a
//! synthetic success without performing network I/O, unless `force_send` is
//! set. This keeps development traffic away from the real endpoint.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::{Environment, TrackerConfig};
use crate::error::{Error, Result};
use crate::event::EventRecord;

/// Outcome of one delivery attempt, consumed by callers to decide on retry.
#[derive(Debug, Clone, Default)]
pub struct DeliveryResult {
    /// Whether the event was accepted (or suppressed as a synthetic success)
    pub success: bool,
    /// Human-readable message, when the endpoint or the gate supplied one
    pub message: Option<String>,
    /// Error description on failure
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// HTTP client for the collection endpoint
pub struct DeliveryClient {
    config: TrackerConfig,
    http_client: reqwest::Client,
    endpoint: String,
}

impl DeliveryClient {
    /// Create a new delivery client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        let endpoint = config.resolved_endpoint();

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Add authorization header
        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            endpoint,
        })
    }

    /// Whether the environment gate suppresses network delivery.
    pub fn suppressed(&self) -> bool {
        self.config.environment != Environment::Production && !self.config.force_send
    }

    /// Deliver one event record. Never errors: every failure is folded into
    /// the returned [`DeliveryResult`].
    pub async fn send(&self, record: &EventRecord) -> DeliveryResult {
        if self.suppressed() {
            tracing::debug!(
                event = %record.event,
                payload = %record.to_payload(),
                "Delivery suppressed outside production"
            );
            return DeliveryResult::ok("suppressed outside production");
        }

        match self.dispatch(record).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(event = %record.event, error = %e, "Event delivery failed");
                DeliveryResult::failure(e.to_string())
            }
        }
    }

    /// Deliver with up to `max_attempts` tries and linear backoff
    /// (`base_delay * attempt_number` between attempts).
    ///
    /// Returns on first success; after exhausting attempts, returns the last
    /// failure.
    pub async fn send_with_retry(
        &self,
        record: &EventRecord,
        max_attempts: usize,
        base_delay: Duration,
    ) -> DeliveryResult {
        let max_attempts = max_attempts.max(1);
        let mut last = DeliveryResult::failure("no delivery attempts made");

        for attempt in 1..=max_attempts {
            let result = self.send(record).await;
            if result.success {
                return result;
            }

            tracing::debug!(
                event = %record.event,
                attempt,
                max_attempts,
                "Delivery attempt failed"
            );
            last = result;

            if attempt < max_attempts {
                tokio::time::sleep(base_delay * attempt as u32).await;
            }
        }

        last
    }

    /// Probe whether the collection endpoint is reachable at all.
    ///
    /// Any HTTP response counts as reachable; only transport failures do not.
    pub async fn health_check(&self) -> bool {
        self.http_client.get(&self.endpoint).send().await.is_ok()
    }

    /// The resolved collection endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn dispatch(&self, record: &EventRecord) -> Result<DeliveryResult> {
        let payload = record.to_payload();

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            // Parsed but not schema-validated
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| Error::Delivery(format!("failed to parse response: {}", e)))?;
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string);
            Ok(DeliveryResult {
                success: true,
                message,
                error: None,
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Delivery(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}
