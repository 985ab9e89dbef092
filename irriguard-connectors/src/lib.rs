//! Transport connectors for the Irriguard ingestion core
//!
//! ## Overview
//!
//! The core is transport-agnostic: it consumes raw wire samples and does not
//! care how they arrived. This crate supplies the two delivery shapes a real
//! deployment uses and the resilience glue between them.
//!
//! ## Transport Selection
//!
//! ### MQTT (push)
//!
//! **When to use:**
//! - A broker is available and the feed publishes continuously
//! - Lowest latency from reading to ingestion matters
//!
//! **Characteristics:**
//! - Persistent connection, one message per sample
//! - QoS 1 gives at-least-once delivery; the core's ordering gate makes the
//!   resulting duplicates harmless
//! - Reconnects after a fixed backoff on any connection loss
//!
//! ### HTTP (pull)
//!
//! **When to use:**
//! - Only a status endpoint exists, or the broker is unreachable
//! - Firewall-constrained deployments
//!
//! **Characteristics:**
//! - One fresh sample per poll
//! - Retries with exponential backoff on transient failures
//!
//! ### Running both
//!
//! [`stream::StreamClient`] prefers push and runs pull in parallel or as a
//! fallback. Both paths feed the same sink; the core's normalizer rejects
//! whatever arrives twice or out of order, so overlap never double-counts.
//!
//! ## Example Usage
//!
//! ```no_run
//! use irriguard_connectors::mqtt::PushConfig;
//! use irriguard_connectors::http::PullConfig;
//! use irriguard_connectors::stream::{StreamClient, StreamConfig};
//! use irriguard_core::StreamContext;
//!
//! # async fn example() -> Result<(), irriguard_connectors::ConnectorError> {
//! let config = StreamConfig::new()
//!     .push(PushConfig::new("broker.local", "greenhouse-1"))
//!     .pull(PullConfig::new("http://gateway.local:8080"));
//!
//! let (client, stop) = StreamClient::new(config)?;
//! let mut ctx = StreamContext::builder().build();
//! client.run(move |raw: irriguard_core::RawSample| { ctx.ingest(&raw); }).await;
//! # drop(stop);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod http;
pub mod mqtt;
pub mod stream;

pub use http::{PullClient, PullConfig};
pub use mqtt::{MqttSubscriber, PushConfig};
pub use stream::{StopHandle, StreamClient, StreamConfig};

use irriguard_core::RawSample;
use thiserror::Error;

/// Common connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// No transport is configured or the connection is gone
    #[error("not connected")]
    NotConnected,

    /// Network-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// A payload arrived but could not be decoded as a sample
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid connector configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Delivery statistics common to all connectors
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Payloads received and decoded
    pub messages_received: u64,
    /// Total payload bytes received
    pub bytes_received: u64,
    /// Payloads that failed to decode as samples
    pub decode_failures: u64,
    /// Reconnection attempts made
    pub reconnections: u64,
    /// Most recent transport error, if any
    pub last_error: Option<String>,
}

/// Destination for decoded samples
///
/// Both transports hand every decoded sample to one of these. A closure
/// works directly; the usual sink wraps `StreamContext::ingest`.
pub trait SampleSink: Send {
    /// Accept one decoded sample
    fn deliver(&mut self, sample: RawSample);
}

impl<F: FnMut(RawSample) + Send> SampleSink for F {
    fn deliver(&mut self, sample: RawSample) {
        self(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deliver_one(sink: &mut dyn SampleSink) {
        sink.deliver(RawSample::default());
    }

    #[test]
    fn closures_are_sinks() {
        let mut count = 0;
        let mut sink = |_s: RawSample| count += 1;
        deliver_one(&mut sink);
        assert_eq!(count, 1);
    }
}
