//! Docker Engine gateway.
//!
//! Adapter over the Docker Engine API via bollard. The collector never talks
//! to bollard directly; everything goes through the [`DockerGateway`] trait so
//! tests can substitute a scripted fake.
//!
//! The gateway exposes name/id resolution, state inspection, follow-mode log
//! streams, and the container event feed, and classifies errors into the
//! categories the collector reacts to (not-found, canceled, everything else).

mod classify;
mod gateway;

pub use gateway::{
    BollardGateway, ContainerEvent, ContainerState, DockerGateway, EventStream, LogStream,
};

/// Errors surfaced by gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    /// The container does not exist (anymore).
    #[error("container not found: {0}")]
    NotFound(String),

    /// Bollard / Docker Engine API error.
    #[error("docker api error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// Daemon unreachable or connection setup failed.
    #[error("docker connection error: {0}")]
    Connection(String),
}

impl DockerError {
    /// True when the error means the container has vanished.
    ///
    /// Falls back to a case-insensitive substring check for errors that lost
    /// their typed classification on the way up.
    pub fn is_not_found(&self) -> bool {
        classify::is_not_found(self)
    }

    /// True when the error is cancellation propagation rather than a fault.
    pub fn is_canceled(&self) -> bool {
        classify::is_canceled(self)
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, DockerError>;
