//! Container log collection subsystem.
//!
//! The collector watches a configured set of container names on the local
//! Docker engine, tails their stdout/stderr with server-side timestamps,
//! normalizes every line into a [`LogEntry`](crate::entry::LogEntry), and
//! hands it to the configured sink. It reacts to container lifecycle events
//! so collection attaches and detaches at runtime, and resumes from a
//! per-container checkpoint after restarts.
//!
//! ## Architecture
//!
//! - [`supervisor`]: worker lifecycle, Docker event reactor, hourly cleaner
//! - [`worker`]: one follow-mode stream per active container
//! - [`parser`]: structured/unstructured decision and multi-line merging
//! - [`monitored`]: registry of target names and resolved/blocked id caches
//! - [`sanitize`]: message cleanup applied before every sink write

pub mod monitored;
pub mod parser;
pub mod sanitize;
mod supervisor;
mod worker;

pub use monitored::{Monitored, MonitoredSet};
pub use parser::{determine_level, LogParser, UnstructuredBuffers};
pub use sanitize::{clean_message, MAX_MESSAGE_BYTES};
pub use supervisor::Collector;
