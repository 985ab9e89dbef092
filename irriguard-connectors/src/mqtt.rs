//! MQTT push connector
//!
//! Subscribes to the sample topic on a broker and delivers every decoded
//! payload to a sink. QoS 1 gives at-least-once delivery; the duplicates
//! that implies are discarded by the core's ordering gate, never here.
//!
//! Connection loss is routine, not fatal: the subscriber sleeps a fixed
//! backoff and reconnects, indefinitely by default or up to a configured
//! attempt cap. A successful connection acknowledgement resets the attempt
//! counter, so a flaky link only gives up after consecutive failures.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::watch;

use crate::{ConnectionStats, ConnectorError, SampleSink};

/// Push connector configuration
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Broker hostname or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// MQTT client identifier
    pub client_id: String,
    /// Topic carrying sample payloads
    pub topic: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Delay before each reconnection attempt
    pub reconnect_backoff: Duration,
    /// Consecutive failed attempts before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
}

impl PushConfig {
    /// Create a configuration for the given broker and client id
    pub fn new(host: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1883,
            client_id: client_id.into(),
            topic: "irriguard/samples".to_string(),
            keep_alive: Duration::from_secs(60),
            reconnect_backoff: Duration::from_millis(2500),
            max_reconnect_attempts: None,
        }
    }

    /// Override the broker port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the sample topic
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the keep-alive interval in seconds
    pub fn keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive = Duration::from_secs(secs);
        self
    }

    /// Set the reconnect backoff in milliseconds
    pub fn reconnect_backoff_ms(mut self, ms: u64) -> Self {
        self.reconnect_backoff = Duration::from_millis(ms);
        self
    }

    /// Cap consecutive reconnection attempts
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }
}

/// Subscribes to the sample topic and feeds a sink until stopped
pub struct MqttSubscriber {
    config: PushConfig,
    stats: ConnectionStats,
}

impl MqttSubscriber {
    /// Create a subscriber; nothing connects until [`run`](Self::run)
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            stats: ConnectionStats::default(),
        }
    }

    /// Run the subscription loop until stopped or the attempt cap is hit
    ///
    /// Returns `Ok(())` on a requested stop and an error only when the
    /// configured attempt cap is exhausted.
    pub async fn run<S: SampleSink>(
        &mut self,
        stop: &mut watch::Receiver<bool>,
        sink: &mut S,
    ) -> Result<(), ConnectorError> {
        let mut attempts: u32 = 0;

        loop {
            if *stop.borrow() {
                return Ok(());
            }
            if let Some(cap) = self.config.max_reconnect_attempts {
                if attempts >= cap {
                    let err = ConnectorError::Transport(format!(
                        "gave up after {} reconnection attempts",
                        attempts
                    ));
                    self.stats.last_error = Some(err.to_string());
                    return Err(err);
                }
            }

            let mut options = MqttOptions::new(
                self.config.client_id.clone(),
                self.config.host.clone(),
                self.config.port,
            );
            options.set_keep_alive(self.config.keep_alive);

            let (client, mut eventloop) = AsyncClient::new(options, 16);
            if let Err(e) = client
                .subscribe(self.config.topic.clone(), QoS::AtLeastOnce)
                .await
            {
                self.note_disconnect(&mut attempts, &e.to_string());
                self.backoff_or_stop(stop).await;
                continue;
            }

            // Poll until the connection drops or a stop is requested.
            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            let _ = client.disconnect().await;
                            return Ok(());
                        }
                    }
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!(
                                "connected to {}:{}, watching {}",
                                self.config.host,
                                self.config.port,
                                self.config.topic
                            );
                            attempts = 0;
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.deliver(&publish.payload, sink);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.note_disconnect(&mut attempts, &e.to_string());
                            break;
                        }
                    }
                }
            }

            self.backoff_or_stop(stop).await;
        }
    }

    /// Delivery statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    fn deliver<S: SampleSink>(&mut self, payload: &[u8], sink: &mut S) {
        let value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                self.stats.decode_failures += 1;
                log::warn!("discarding undecodable payload: {}", e);
                return;
            }
        };
        match irriguard_core::RawSample::from_value(&value) {
            Some(sample) => {
                self.stats.messages_received += 1;
                self.stats.bytes_received += payload.len() as u64;
                sink.deliver(sample);
            }
            None => {
                self.stats.decode_failures += 1;
                log::warn!("discarding payload that is not a sample object");
            }
        }
    }

    fn note_disconnect(&mut self, attempts: &mut u32, error: &str) {
        *attempts += 1;
        self.stats.reconnections += 1;
        self.stats.last_error = Some(error.to_string());
        log::warn!(
            "broker connection lost ({}), reconnecting in {:?}",
            error,
            self.config.reconnect_backoff
        );
    }

    async fn backoff_or_stop(&self, stop: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = stop.changed() => {}
            _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = PushConfig::new("broker.local", "greenhouse-1")
            .port(8883)
            .topic("farm/plot-a/samples")
            .keep_alive_secs(30)
            .reconnect_backoff_ms(2000)
            .max_reconnect_attempts(5);

        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 8883);
        assert_eq!(config.topic, "farm/plot-a/samples");
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.reconnect_backoff, Duration::from_millis(2000));
        assert_eq!(config.max_reconnect_attempts, Some(5));
    }

    #[test]
    fn payload_decode_feeds_sink_and_stats() {
        let mut sub = MqttSubscriber::new(PushConfig::new("broker.local", "t"));
        let mut delivered = Vec::new();
        let mut sink = |s: irriguard_core::RawSample| delivered.push(s);

        sub.deliver(br#"{"timestamp": 1, "flow_rate_lps": 0.4}"#, &mut sink);
        sub.deliver(b"not json", &mut sink);
        sub.deliver(b"42", &mut sink);

        assert_eq!(delivered.len(), 1);
        assert_eq!(sub.stats().messages_received, 1);
        assert_eq!(sub.stats().decode_failures, 2);
    }

    #[tokio::test]
    async fn attempt_cap_gives_up_with_an_error() {
        // Nothing listens on this port; every connection attempt fails fast.
        let config = PushConfig::new("127.0.0.1", "t")
            .port(1)
            .reconnect_backoff_ms(1)
            .max_reconnect_attempts(2);
        let mut sub = MqttSubscriber::new(config);
        let (_tx, mut rx) = watch::channel(false);
        let mut sink = |_s: irriguard_core::RawSample| {};

        let err = sub.run(&mut rx, &mut sink).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Transport(_)));
        assert!(sub.stats().reconnections >= 2);
    }

    #[tokio::test]
    async fn stop_request_ends_the_loop_cleanly() {
        let config = PushConfig::new("127.0.0.1", "t").port(1).reconnect_backoff_ms(50);
        let mut sub = MqttSubscriber::new(config);
        let (tx, mut rx) = watch::channel(false);
        let mut sink = |_s: irriguard_core::RawSample| {};

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
            tx
        });

        let result = sub.run(&mut rx, &mut sink).await;
        assert!(result.is_ok());
        let _ = stopper.await;
    }
}
