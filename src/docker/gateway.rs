//! Docker Engine API adapter.
//!
//! [`BollardGateway`] is the production implementation of [`DockerGateway`]
//! on top of bollard. Connection goes through the local daemon socket; the
//! constructor pings once so a dead daemon fails startup instead of failing
//! the first worker.

use crate::docker::{DockerError, Result};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, LogOutput, LogsOptions};
use bollard::system::EventsOptions;
use bollard::Docker;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Follow-mode log stream: raw bytes as the daemon hands them over.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Container lifecycle event stream.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ContainerEvent>> + Send>>;

/// One `container`-type event from the daemon.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    /// Event action, e.g. `start`, `stop`, `die`, `destroy`.
    pub action: String,
    /// Id of the container the event refers to.
    pub actor_id: String,
    /// Container name from the event attributes, when the daemon included it.
    pub name: Option<String>,
}

/// Container runtime state as reported by inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Container is running
    Running,
    /// Container is paused
    Paused,
    /// Container is restarting
    Restarting,
    /// Container exited or was never started
    Exited,
    /// Container is dead
    Dead,
}

impl ContainerState {
    /// True only for [`ContainerState::Running`].
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Dead => write!(f, "dead"),
        }
    }
}

/// Capability set the collector requires from the Docker Engine.
///
/// Production uses [`BollardGateway`]; tests drive the collector with
/// scripted fakes implementing this trait.
#[async_trait]
pub trait DockerGateway: Send + Sync {
    /// Verify daemon connectivity.
    async fn ping(&self) -> Result<()>;

    /// Resolve a container name to its id.
    async fn resolve_name_to_id(&self, name: &str) -> Result<String>;

    /// Resolve a container id to its name (leading `/` stripped).
    async fn resolve_id_to_name(&self, id: &str) -> Result<String>;

    /// Inspect the current runtime state of a container.
    async fn inspect_state(&self, id: &str) -> Result<ContainerState>;

    /// Open a follow-mode log stream with server-side timestamps.
    ///
    /// `since` is the last processed Docker frame timestamp; `None` starts
    /// from the stream head. The stream ends when the container exits or the
    /// stream is dropped.
    async fn open_log_stream(&self, id: &str, since: Option<&str>) -> Result<LogStream>;

    /// Subscribe to `container`-type daemon events.
    fn watch_events(&self) -> EventStream;
}

/// Production gateway backed by the local Docker daemon.
#[derive(Clone)]
pub struct BollardGateway {
    docker: Arc<Docker>,
}

impl BollardGateway {
    /// Connect to the local daemon and verify it answers.
    ///
    /// # Errors
    ///
    /// Returns error when the socket is unavailable or the ping fails; the
    /// caller is expected to abort startup on this.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::Connection(e.to_string()))?;

        let gateway = Self {
            docker: Arc::new(docker),
        };
        gateway.ping().await?;
        debug!("connected to Docker daemon via local defaults");

        Ok(gateway)
    }

    /// Wrap an existing bollard client.
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker: Arc::new(docker),
        }
    }

    /// Translate a stored frame timestamp into the epoch seconds bollard
    /// accepts for `since`. An unparseable value counts as no checkpoint.
    fn since_seconds(since: Option<&str>) -> i64 {
        let Some(text) = since else { return 0 };
        if text.is_empty() {
            return 0;
        }
        match chrono::DateTime::parse_from_rfc3339(text) {
            Ok(ts) => ts.timestamp(),
            Err(err) => {
                warn!(since = %text, error = %err, "unparseable checkpoint timestamp, starting from stream head");
                0
            }
        }
    }
}

#[async_trait]
impl DockerGateway for BollardGateway {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| DockerError::Connection(format!("failed to ping Docker daemon: {e}")))?;
        Ok(())
    }

    async fn resolve_name_to_id(&self, name: &str) -> Result<String> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        // The name filter matches substrings; pick the exact name only.
        for container in containers {
            let matched = container
                .names
                .iter()
                .flatten()
                .any(|n| n.trim_start_matches('/') == name);
            if matched {
                if let Some(id) = container.id {
                    return Ok(id);
                }
            }
        }

        Err(DockerError::NotFound(name.to_string()))
    }

    async fn resolve_id_to_name(&self, id: &str) -> Result<String> {
        let inspect = self
            .docker
            .inspect_container(id, None::<bollard::container::InspectContainerOptions>)
            .await
            .map_err(map_404(id))?;

        match inspect.name {
            Some(name) if !name.is_empty() => Ok(name.trim_start_matches('/').to_string()),
            _ => Err(DockerError::NotFound(id.to_string())),
        }
    }

    async fn inspect_state(&self, id: &str) -> Result<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(id, None::<bollard::container::InspectContainerOptions>)
            .await
            .map_err(map_404(id))?;

        let state = inspect
            .state
            .ok_or_else(|| DockerError::NotFound(id.to_string()))?;

        if state.running.unwrap_or(false) {
            Ok(ContainerState::Running)
        } else if state.paused.unwrap_or(false) {
            Ok(ContainerState::Paused)
        } else if state.restarting.unwrap_or(false) {
            Ok(ContainerState::Restarting)
        } else if state.dead.unwrap_or(false) {
            Ok(ContainerState::Dead)
        } else {
            Ok(ContainerState::Exited)
        }
    }

    async fn open_log_stream(&self, id: &str, since: Option<&str>) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "all".to_string(),
            since: Self::since_seconds(since),
            ..Default::default()
        };

        let stream = self
            .docker
            .logs(id, Some(options))
            .map(|item| item.map(LogOutput::into_bytes).map_err(DockerError::from));

        Ok(Box::pin(stream))
    }

    fn watch_events(&self) -> EventStream {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);

        let stream = self
            .docker
            .events(Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            }))
            .map(|item| {
                item.map(|msg| {
                    let (actor_id, name) = match msg.actor {
                        Some(actor) => {
                            let name = actor
                                .attributes
                                .as_ref()
                                .and_then(|attrs| attrs.get("name"))
                                .map(|n| n.trim_start_matches('/').to_string())
                                .filter(|n| !n.is_empty());
                            (actor.id.unwrap_or_default(), name)
                        }
                        None => (String::new(), None),
                    };

                    ContainerEvent {
                        action: msg.action.unwrap_or_default(),
                        actor_id,
                        name,
                    }
                })
                .map_err(DockerError::from)
            });

        Box::pin(stream)
    }
}

/// Map a bollard 404 onto the typed not-found variant.
fn map_404(id: &str) -> impl FnOnce(bollard::errors::Error) -> DockerError + '_ {
    move |e| match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => DockerError::NotFound(id.to_string()),
        e => DockerError::Api(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_since_seconds_parses_frame_timestamp() {
        let secs = BollardGateway::since_seconds(Some("2024-07-02T05:56:54.617283561Z"));
        assert_eq!(secs, 1_719_899_814);
    }

    #[test]
    fn test_since_seconds_tolerates_garbage() {
        assert_eq!(BollardGateway::since_seconds(Some("not a time")), 0);
        assert_eq!(BollardGateway::since_seconds(Some("")), 0);
        assert_eq!(BollardGateway::since_seconds(None), 0);
    }

    #[test]
    fn test_container_state_display() {
        assert_eq!(ContainerState::Running.to_string(), "running");
        assert_eq!(ContainerState::Exited.to_string(), "exited");
        assert!(ContainerState::Running.is_running());
        assert!(!ContainerState::Dead.is_running());
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires a running Docker daemon
    async fn test_gateway_connect_and_ping() {
        let gateway = BollardGateway::connect().await.unwrap();
        gateway.ping().await.unwrap();
    }
}
