//! HTTP client module for delivering correlated events to the collector.
//!
//! This module provides an async HTTP client with connection pooling, a
//! single-attempt `deliver` operation and the backoff and retry
//! classification used by the forwarder's retry buffer.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::Config;
use crate::event::CorrelatedEvent;

/// Default base delay for exponential backoff (in milliseconds).
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Maximum delay between retries (in milliseconds).
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Longest collector response body kept in an error.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Errors that can occur during HTTP client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Collector answered with something other than its success status
    Status {
        code: StatusCode,
        message: String,
    },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Collector error ({}): {}", code, message)
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(ClientError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// HTTP client for the collector endpoint.
///
/// The underlying `reqwest::Client` is reused across deliveries so
/// connections are pooled.
///
/// # Example
///
/// ```no_run
/// use proxylog_forwarder::client::CollectorClient;
/// use proxylog_forwarder::config::Config;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::default();
///     let client = CollectorClient::new(&config).expect("Failed to create client");
///     println!("Delivering to {}", client.collector_url());
/// }
/// ```
#[derive(Clone)]
pub struct CollectorClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    collector_url: String,

    /// The one status code that counts as delivered
    success_status: StatusCode,

    /// Request timeout duration
    timeout: Duration,
}

impl CollectorClient {
    /// Create a new collector client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the success status is not a valid
    /// HTTP status or the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(
            config.collector_url.clone(),
            config.success_status,
            config.request_timeout,
        )
    }

    /// Create a new collector client with custom settings.
    pub fn with_settings(
        collector_url: impl Into<String>,
        success_status: u16,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let success_status = StatusCode::from_u16(success_status)
            .map_err(|e| ClientError::Config(format!("invalid success status {}: {}", success_status, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            collector_url: collector_url.into(),
            success_status,
            timeout,
        })
    }

    /// POST one event to the collector.
    ///
    /// Exactly one request is made. Only the configured success status
    /// counts as delivered; any other status, a timeout or a connection
    /// error is `Failed`.
    pub async fn deliver(&self, event: &CorrelatedEvent) -> DeliveryOutcome {
        match self.send_request(event).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::Failed(e),
        }
    }

    async fn send_request(&self, event: &CorrelatedEvent) -> Result<(), ClientError> {
        let record = event.to_record();
        debug!(
            uuid = %record.uuid,
            destination = %record.destination,
            url = %self.collector_url,
            "Delivering event"
        );

        let response = self
            .client
            .post(&self.collector_url)
            .timeout(self.timeout)
            .json(&record)
            .send()
            .await?;

        let status = response.status();
        if status == self.success_status {
            return Ok(());
        }

        let mut message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if message.chars().count() > MAX_ERROR_BODY_CHARS {
            message = message.chars().take(MAX_ERROR_BODY_CHARS).collect();
        }

        Err(ClientError::Status {
            code: status,
            message,
        })
    }

    /// Get the configured collector URL.
    pub fn collector_url(&self) -> &str {
        &self.collector_url
    }

    pub fn success_status(&self) -> StatusCode {
        self.success_status
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Calculate the backoff delay for a given retry attempt.
///
/// Uses exponential backoff with jitter:
/// delay = min(base_delay * 2^attempt + jitter, max_delay)
pub fn backoff_delay(attempt: u32) -> Duration {
    let base_delay = DEFAULT_BASE_DELAY_MS;

    // Calculate exponential delay: base * 2^attempt
    let exponential_delay = base_delay.saturating_mul(1 << attempt.min(10));

    // Add jitter (up to 25% of the delay)
    let jitter = rand::random::<u64>() % (exponential_delay / 4 + 1);

    // Cap at maximum delay
    let total_delay = exponential_delay.saturating_add(jitter).min(MAX_RETRY_DELAY_MS);

    Duration::from_millis(total_delay)
}

/// Check if an error is retryable.
///
/// Retryable errors include:
/// - Connection errors
/// - Timeouts
/// - Server errors (5xx)
/// - Rate limiting (429)
pub fn is_retryable_error(error: &ClientError) -> bool {
    match error {
        ClientError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
        ClientError::Timeout => true,
        ClientError::Status { code, .. } => {
            code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
        }
        ClientError::Config(_) => false,
    }
}
