//! # dockstream
//!
//! A Docker-aware log collection daemon. dockstream watches a configured set
//! of containers on the local Docker engine, tails their stdout/stderr
//! streams with server-side timestamps, normalizes every line into a
//! structured record, and hands it to a pluggable sink. Container lifecycle
//! events attach and detach collection at runtime, and a per-container
//! checkpoint lets a restart resume without losing or duplicating long runs
//! of output.
//!
//! ## Architecture Overview
//!
//! - **[`docker`]**: gateway over the Docker Engine API (bollard) with error
//!   classification for vanished containers and cancellation
//! - **[`collector`]**: supervisor, per-container stream workers, the event
//!   reactor, the hourly cleaner, and the log parser
//! - **[`entry`]**: the normalized log record handed to the sink
//! - **[`sink`]**: persistence contract plus JSON-lines and in-memory sinks
//! - **[`checkpoint`]**: per-container resume cursors over a key/value store
//! - **[`config`]**: TOML configuration discovery and defaults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dockstream::{BollardGateway, Collector, CollectorConfig, JsonlSink, SledCheckpointStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CollectorConfig::load()?;
//!     let gateway = Arc::new(BollardGateway::connect().await?);
//!     let sink = Arc::new(JsonlSink::open(&config.sink_path).await?);
//!     let checkpoints = Arc::new(SledCheckpointStore::open(&config.checkpoint_path)?);
//!
//!     let cancel = CancellationToken::new();
//!     let collector = Collector::new(gateway, sink, checkpoints, &config, cancel.clone());
//!     collector.start().await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     cancel.cancel();
//!     Ok(())
//! }
//! ```

/// Docker Engine gateway and error classification.
pub mod docker;

/// Collection subsystem: supervisor, workers, parser, monitored set.
pub mod collector;

/// Normalized log record model.
pub mod entry;

/// Log persistence sinks.
pub mod sink;

/// Per-container resume checkpoints.
pub mod checkpoint;

/// Configuration discovery and defaults.
pub mod config;

// Re-export the main collector types
pub use collector::{Collector, LogParser, Monitored, MonitoredSet};

// Re-export the gateway types
pub use docker::{BollardGateway, ContainerEvent, ContainerState, DockerError, DockerGateway};

// Re-export the data model and collaborator contracts
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, SledCheckpointStore};
pub use config::CollectorConfig;
pub use entry::LogEntry;
pub use sink::{JsonlSink, LogSink, MemorySink, SinkError};
