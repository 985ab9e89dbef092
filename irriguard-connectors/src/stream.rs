//! Composite stream client
//!
//! Runs the push and pull transports together and funnels everything they
//! decode into one sink, in arrival order. Push is preferred for latency;
//! pull runs alongside it (or alone) at a fixed cadence, covering broker
//! outages. Overlap between the two is resolved downstream by the core's
//! ordering gate, so this layer never deduplicates.
//!
//! Stopping is cooperative: [`StopHandle::stop`] tells both transports to
//! wind down and the delivery loop drains whatever is already in flight.

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use irriguard_core::RawSample;

use crate::http::{PullClient, PullConfig};
use crate::mqtt::{MqttSubscriber, PushConfig};
use crate::{ConnectorError, SampleSink};

/// Capacity of the transport-to-sink channel
const DELIVERY_BUFFER: usize = 64;

/// Composite client configuration
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// Push transport; preferred when configured
    pub push: Option<PushConfig>,
    /// Pull transport; fallback or parallel source
    pub pull: Option<PullConfig>,
    /// Pull poll cadence in milliseconds
    pub poll_interval_ms: u64,
}

impl StreamConfig {
    /// Start from defaults: no transports, 1 s poll cadence
    pub fn new() -> Self {
        Self {
            push: None,
            pull: None,
            poll_interval_ms: 1000,
        }
    }

    /// Configure the push transport
    pub fn push(mut self, config: PushConfig) -> Self {
        self.push = Some(config);
        self
    }

    /// Configure the pull transport
    pub fn pull(mut self, config: PullConfig) -> Self {
        self.pull = Some(config);
        self
    }

    /// Override the pull poll cadence
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }
}

/// Requests a cooperative stop of a running [`StreamClient`]
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Ask the client to stop; idempotent
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Feeds one sink from the configured transports until stopped
#[derive(Debug)]
pub struct StreamClient {
    config: StreamConfig,
    pull: Option<PullClient>,
    stop_rx: watch::Receiver<bool>,
}

impl StreamClient {
    /// Build a client and its stop handle
    ///
    /// At least one transport must be configured.
    pub fn new(config: StreamConfig) -> Result<(Self, StopHandle), ConnectorError> {
        if config.push.is_none() && config.pull.is_none() {
            return Err(ConnectorError::Config(
                "at least one of push or pull must be configured".into(),
            ));
        }

        let pull = match &config.pull {
            Some(cfg) => Some(PullClient::new(cfg.clone())?),
            None => None,
        };

        let (tx, stop_rx) = watch::channel(false);
        Ok((
            Self {
                config,
                pull,
                stop_rx,
            },
            StopHandle { tx },
        ))
    }

    /// Run both transports, delivering every decoded sample to `sink`
    ///
    /// Returns when a stop is requested and in-flight samples are drained.
    pub async fn run<S: SampleSink>(self, mut sink: S) {
        let (samples_tx, mut samples_rx) = mpsc::channel::<RawSample>(DELIVERY_BUFFER);

        let push_task = self.config.push.clone().map(|push_cfg| {
            let tx = samples_tx.clone();
            let mut stop = self.stop_rx.clone();
            tokio::spawn(async move {
                let mut subscriber = MqttSubscriber::new(push_cfg);
                let mut forward = move |sample: RawSample| {
                    if let Err(e) = tx.try_send(sample) {
                        log::warn!("dropping push sample, sink is behind: {}", e);
                    }
                };
                if let Err(e) = subscriber.run(&mut stop, &mut forward).await {
                    log::error!("push transport stopped: {}", e);
                }
            })
        });

        let pull_task = self.pull.map(|client| {
            let tx = samples_tx;
            let mut stop = self.stop_rx.clone();
            let interval_ms = self.config.poll_interval_ms;
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_millis(interval_ms));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                return;
                            }
                        }
                        _ = ticker.tick() => match client.fetch_latest().await {
                            Ok(sample) => {
                                if tx.send(sample).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => log::warn!("poll failed: {}", e),
                        }
                    }
                }
            })
        });

        let mut stop = self.stop_rx.clone();
        loop {
            tokio::select! {
                maybe = samples_rx.recv() => match maybe {
                    Some(sample) => sink.deliver(sample),
                    None => break,
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain what the transports already decoded before they wound down.
        while let Ok(sample) = samples_rx.try_recv() {
            sink.deliver(sample);
        }

        if let Some(task) = push_task {
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = pull_task {
            task.abort();
            let _ = task.await;
        }
    }
}
