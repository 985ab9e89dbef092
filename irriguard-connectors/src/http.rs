//! HTTP pull connector
//!
//! Polls a gateway status endpoint for the latest reading. Less efficient
//! than the push path but works anywhere an HTTP endpoint is reachable, and
//! doubles as the fallback when the broker connection is down.
//!
//! Uses the lightweight [`ureq`] client behind an async retry wrapper:
//! transient failures (transport errors, 5xx, 429) back off exponentially up
//! to the configured retry cap; anything else fails the poll immediately.
//! The poll cadence itself is owned by [`crate::stream::StreamClient`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use irriguard_core::RawSample;

use crate::{ConnectionStats, ConnectorError};

/// Pull connector configuration
#[derive(Debug, Clone)]
pub struct PullConfig {
    /// Base URL of the gateway
    pub base_url: String,
    /// Endpoint path returning the latest reading
    pub path: String,
    /// Request timeout
    pub timeout: Duration,
    /// Retries per poll on transient failure
    pub max_retries: u32,
    /// User agent string
    pub user_agent: String,
}

impl PullConfig {
    /// Create a configuration for the given gateway base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: "/api/status-report".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            user_agent: format!("Irriguard/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Override the endpoint path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the request timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Set the retry cap per poll
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Polls the gateway for fresh samples
#[derive(Debug)]
pub struct PullClient {
    config: PullConfig,
    agent: ureq::Agent,
    stats: Arc<Mutex<ConnectionStats>>,
}

impl PullClient {
    /// Create a pull client, validating the configured URL
    pub fn new(config: PullConfig) -> Result<Self, ConnectorError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(ConnectorError::Config(
                "base URL must start with http:// or https://".into(),
            ));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();

        Ok(Self {
            config,
            agent,
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
        })
    }

    /// Fetch the latest reading from the gateway
    ///
    /// Retries transient failures with exponential backoff. An endpoint
    /// returning a JSON array is treated as a history window; the newest
    /// entry is the sample.
    pub async fn fetch_latest(&self) -> Result<RawSample, ConnectorError> {
        let url = format!("{}{}", self.config.base_url, self.config.path);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * (1 << attempt));
                tokio::time::sleep(delay).await;
            }

            let request = self
                .agent
                .get(&url)
                .set("Accept", "application/json");

            match request.call() {
                Ok(resp) => {
                    let text = resp
                        .into_string()
                        .map_err(|e| ConnectorError::Transport(e.to_string()))?;
                    return self.decode(&text);
                }
                Err(ureq::Error::Status(code, resp)) => {
                    let message = resp.into_string().unwrap_or_default();
                    let err = ConnectorError::Transport(format!("HTTP {}: {}", code, message));
                    // Rate limits and server faults are worth retrying.
                    if code >= 500 || code == 429 {
                        log::debug!("poll attempt {} failed: {}", attempt, err);
                        last_error = Some(err);
                        continue;
                    }
                    self.record_error(&err);
                    return Err(err);
                }
                Err(ureq::Error::Transport(e)) => {
                    let err = ConnectorError::Transport(e.to_string());
                    log::debug!("poll attempt {} failed: {}", attempt, err);
                    last_error = Some(err);
                }
            }
        }

        let err = last_error.unwrap_or(ConnectorError::NotConnected);
        self.record_error(&err);
        Err(err)
    }

    /// Delivery statistics
    pub fn stats(&self) -> ConnectionStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn decode(&self, text: &str) -> Result<RawSample, ConnectorError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ConnectorError::Decode(e.to_string()))?;

        match RawSample::from_value(&value) {
            Some(sample) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.messages_received += 1;
                    stats.bytes_received += text.len() as u64;
                }
                Ok(sample)
            }
            None => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.decode_failures += 1;
                }
                Err(ConnectorError::Decode("payload is not a sample object".into()))
            }
        }
    }

    fn record_error(&self, err: &ConnectorError) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.last_error = Some(err.to_string());
        }
    }
}
