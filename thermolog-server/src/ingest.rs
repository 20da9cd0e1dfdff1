//! Sensor ingestion: Zenoh subscription to decoded, stored readings.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use zenoh::sample::SampleKind;

use thermolog_common::config::ZenohConfig;
use thermolog_common::{NewReading, connect};

use crate::config::IngestConfig;
use crate::store::{SharedStore, run_blocking};

/// Ingestion statistics.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Messages taken off the subscription.
    pub messages_received: u64,
    /// Readings successfully appended to the store.
    pub readings_stored: u64,
    /// Messages dropped because they could not be decoded.
    pub decode_failures: u64,
    /// Decoded readings lost to a storage error.
    pub store_failures: u64,
}

/// Turns raw sensor payloads into stored readings.
pub struct Ingestor {
    store: SharedStore,
    stats: RwLock<IngestStats>,
}

/// Shareable ingestor handle.
pub type SharedIngestor = Arc<Ingestor>;

impl Ingestor {
    /// Create an ingestor appending to `store`.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            stats: RwLock::new(IngestStats::default()),
        }
    }

    /// Decode one payload and append it.
    ///
    /// Returns the new reading's id. Malformed payloads and storage failures
    /// are logged and counted, never propagated: one bad message must not
    /// stop the subscription loop.
    pub async fn handle_payload(&self, payload: &[u8]) -> Option<i64> {
        self.stats.write().messages_received += 1;

        let reading = match NewReading::decode(payload) {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.write().decode_failures += 1;
                warn!(
                    error = %e,
                    payload_len = payload.len(),
                    "Dropping undecodable sensor message"
                );
                return None;
            }
        };

        match run_blocking(&self.store, move |store| store.append(&reading)).await {
            Ok(id) => {
                self.stats.write().readings_stored += 1;
                debug!(
                    id,
                    temperature = ?reading.temperature,
                    humidity = ?reading.humidity,
                    heat_index = ?reading.heat_index,
                    timestamp = ?reading.timestamp,
                    "Reading stored"
                );
                Some(id)
            }
            Err(e) => {
                self.stats.write().store_failures += 1;
                error!(error = %e, "Failed to store reading, dropping it");
                None
            }
        }
    }

    /// Get ingestion statistics.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }
}

/// Exponential retry delay, doubling up to a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Resolve once shutdown is requested or the sender is gone.
///
/// The `watch::Ref` from `wait_for` is a lock guard and is not `Send`; it must
/// not outlive this future.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Why a subscription session ended.
enum SessionEnd {
    Shutdown,
    StreamClosed,
}

/// Zenoh subscriber that feeds sensor messages to the [`Ingestor`].
pub struct ReadingSubscriber {
    ingestor: SharedIngestor,
    zenoh_config: ZenohConfig,
    ingest_config: IngestConfig,
}

impl ReadingSubscriber {
    /// Create a new subscriber.
    pub fn new(
        ingestor: SharedIngestor,
        zenoh_config: ZenohConfig,
        ingest_config: IngestConfig,
    ) -> Self {
        Self {
            ingestor,
            zenoh_config,
            ingest_config,
        }
    }

    /// Run the subscriber until the shutdown signal is received.
    ///
    /// Connection failures never end the loop: the session is re-opened with
    /// exponential backoff for as long as the process runs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.ingest_config.reconnect_initial_ms),
            Duration::from_millis(self.ingest_config.reconnect_max_ms),
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.subscribe(&mut shutdown, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::StreamClosed) => {
                    warn!(topic = %self.ingest_config.topic, "Subscription closed, reconnecting");
                }
                Err(e) => {
                    warn!(error = %e, "Broker unavailable");
                }
            }

            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "Retrying broker connection");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_requested(&mut shutdown) => break,
            }
        }

        let stats = self.ingestor.stats();
        info!(
            messages_received = stats.messages_received,
            readings_stored = stats.readings_stored,
            "Subscriber stopped"
        );
        Ok(())
    }

    /// One session: connect, subscribe, and process samples until the
    /// stream ends or shutdown is requested.
    async fn subscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> anyhow::Result<SessionEnd> {
        let session = tokio::select! {
            res = connect(&self.zenoh_config) => res?,
            _ = stop_requested(shutdown) => return Ok(SessionEnd::Shutdown),
        };

        let topic = self.ingest_config.topic.as_str();
        info!(topic, "Subscribing to sensor readings");
        let subscriber = match session.declare_subscriber(topic).await {
            Ok(subscriber) => subscriber,
            Err(e) => {
                let _ = session.close().await;
                return Err(anyhow::anyhow!("Failed to create subscriber: {}", e));
            }
        };

        backoff.reset();
        info!("Subscriber started, waiting for readings...");

        let end = loop {
            tokio::select! {
                _ = stop_requested(shutdown) => {
                    info!("Shutdown signal received, stopping subscriber");
                    break SessionEnd::Shutdown;
                }

                sample = subscriber.recv_async() => {
                    match sample {
                        Ok(sample) => {
                            if sample.kind() == SampleKind::Delete {
                                trace!(key = %sample.key_expr(), "Ignoring delete sample");
                                continue;
                            }

                            let payload = sample.payload().to_bytes();
                            trace!(
                                key = %sample.key_expr(),
                                payload_len = payload.len(),
                                "Received sensor message"
                            );
                            // Finish this message before taking the next one
                            self.ingestor.handle_payload(&payload).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "Error receiving sample");
                            break SessionEnd::StreamClosed;
                        }
                    }
                }
            }
        };

        // Clean shutdown
        if let Err(e) = subscriber.undeclare().await {
            debug!(error = %e, "Failed to undeclare subscriber");
        }
        if let Err(e) = session.close().await {
            debug!(error = %e, "Failed to close Zenoh session");
        }

        Ok(end)
    }
}
