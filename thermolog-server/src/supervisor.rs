//! Process supervision: runs ingestion and the query API side by side.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::http::HttpServer;
use crate::ingest::{Ingestor, ReadingSubscriber};
use crate::store::SharedStore;

/// How long tasks get to wind down after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type TaskResult = Result<anyhow::Result<()>, JoinError>;

/// What ended the run.
enum Exit {
    Signal,
    Subscriber(TaskResult),
    Http(TaskResult),
}

/// Owns the store for the lifetime of the process and supervises the
/// subscriber and HTTP tasks.
pub struct Supervisor {
    config: ServerConfig,
    store: SharedStore,
}

impl Supervisor {
    pub fn new(config: ServerConfig, store: SharedStore) -> Self {
        Self { config, store }
    }

    /// Run until `shutdown_signal` resolves or either task exits.
    ///
    /// In both cases the other task is told to stop, given a grace period,
    /// and the store is closed before returning. A task that exits on its own
    /// is an error.
    pub async fn run<F>(self, shutdown_signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let listen_addr: SocketAddr = self
            .config
            .http
            .listen
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

        let ingestor = Arc::new(Ingestor::new(self.store.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let subscriber = ReadingSubscriber::new(
            ingestor.clone(),
            self.config.zenoh.clone(),
            self.config.ingest.clone(),
        );
        let mut http_server = HttpServer::new(
            self.store.clone(),
            ingestor.clone(),
            listen_addr,
            self.config.http.history_limit,
        );
        if self.config.http.request_timeout_secs > 0 {
            http_server = http_server
                .with_request_timeout(Duration::from_secs(self.config.http.request_timeout_secs));
        }

        let mut subscriber_task = tokio::spawn(subscriber.run(shutdown_rx.clone()));
        let mut http_task = tokio::spawn(http_server.run(shutdown_rx));

        info!(
            topic = %self.config.ingest.topic,
            listen = %listen_addr,
            "Thermolog running"
        );

        let exit = tokio::select! {
            _ = shutdown_signal => Exit::Signal,
            res = &mut subscriber_task => Exit::Subscriber(res),
            res = &mut http_task => Exit::Http(res),
        };

        let (outcome, remaining) = match exit {
            Exit::Signal => {
                info!("Shutdown requested");
                (Ok(()), vec![subscriber_task, http_task])
            }
            Exit::Subscriber(res) => (task_outcome("subscriber", res), vec![http_task]),
            Exit::Http(res) => (task_outcome("http", res), vec![subscriber_task]),
        };

        // Signal shutdown
        let _ = shutdown_tx.send(true);
        drain(remaining).await;

        let stats = ingestor.stats();
        info!(
            messages_received = stats.messages_received,
            readings_stored = stats.readings_stored,
            decode_failures = stats.decode_failures,
            store_failures = stats.store_failures,
            "Final statistics"
        );

        if let Err(e) = self.store.close() {
            warn!(error = %e, "Failed to close reading store");
        }

        info!("Thermolog stopped");
        outcome
    }
}

/// Turn an unprompted task exit into the run's result.
fn task_outcome(name: &str, res: TaskResult) -> anyhow::Result<()> {
    match res {
        Ok(Ok(())) => Err(anyhow::anyhow!("{} task stopped unexpectedly", name)),
        Ok(Err(e)) => {
            error!(task = name, error = %e, "Task failed");
            Err(e.context(format!("{} task failed", name)))
        }
        Err(e) => Err(anyhow::anyhow!("{} task panicked: {}", name, e)),
    }
}

/// Wait for tasks to finish, aborting whatever outlives the grace period.
async fn drain(tasks: Vec<JoinHandle<anyhow::Result<()>>>) {
    let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();

    let wait_all = async {
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Task ended with error during shutdown"),
                Err(e) => warn!(error = %e, "Task panicked during shutdown"),
            }
        }
    };

    if tokio::time::timeout(SHUTDOWN_GRACE, wait_all).await.is_err() {
        warn!("Tasks did not stop in time, aborting");
        for abort in aborts {
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use crate::store::{ReadingStore, StoreError};
    use thermolog_common::ZenohConfig;

    /// Config whose broker is unreachable, so the subscriber keeps retrying.
    fn offline_config(listen: &str) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.zenoh = ZenohConfig::client("127.0.0.1:1");
        config.http.listen = listen.to_string();
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_signal_shuts_down_and_closes_store() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let supervisor = Supervisor::new(offline_config("127.0.0.1:0"), store.clone());

        let result = supervisor
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert!(result.is_ok());
        assert!(matches!(store.latest(), Err(StoreError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_http_bind_failure_is_fatal() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap().to_string();

        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let supervisor = Supervisor::new(offline_config(&addr), store.clone());

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            supervisor.run(std::future::pending()),
        )
        .await
        .expect("supervisor did not stop after fatal error");

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to bind"));
        assert!(matches!(store.latest(), Err(StoreError::Closed)));
    }

    #[test]
    fn test_task_outcome() {
        assert!(task_outcome("http", Ok(Ok(()))).is_err());
        assert!(task_outcome("http", Ok(Err(anyhow::anyhow!("boom")))).is_err());
    }
}
