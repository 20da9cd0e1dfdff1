//! Sensor reading logger.
//!
//! Subscribes to temperature/humidity readings published over Zenoh, stores
//! every reading in SQLite, and serves the latest reading and recent history
//! over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Zenoh Network  │────>│    Ingestor     │────>│  Reading Store  │────>│   HTTP Server   │
//! │    (dht22)      │     │ (decode/append) │     │    (SQLite)     │     │ (/latest, ...)  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! The subscriber and the HTTP server run as independent tasks under the
//! [`Supervisor`]; they share nothing but the store.
//!
//! # Usage
//!
//! ```bash
//! thermolog --config thermolog.json5
//! thermolog --broker 192.168.1.10:7447 --db sensor_data.db --listen 0.0.0.0:5000
//! ```
//!
//! # Configuration
//!
//! See [`config::ServerConfig`] for configuration options.

pub mod config;
pub mod http;
pub mod ingest;
pub mod sqlite;
pub mod store;
pub mod supervisor;

pub use config::ServerConfig;
pub use http::{HttpServer, ReadingSummary, create_router};
pub use ingest::{IngestStats, Ingestor, ReadingSubscriber, SharedIngestor};
pub use sqlite::SqliteStore;
pub use store::{ReadingStore, SharedStore, StoreError};
pub use supervisor::Supervisor;
