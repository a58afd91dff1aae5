//! Collector supervisor, event reactor, and periodic cleaner.
//!
//! The supervisor owns the per-container workers: it resolves the configured
//! names at startup, guarantees at most one active worker per container id,
//! and tears state down when containers stop, die, or vanish. The event
//! reactor mutates the monitored set as containers come and go; the hourly
//! cleaner reconciles in-memory state against what the daemon actually
//! reports.

use crate::checkpoint::CheckpointStore;
use crate::collector::monitored::{Monitored, MonitoredSet};
use crate::collector::parser::{LogParser, UnstructuredBuffers};
use crate::collector::worker;
use crate::config::CollectorConfig;
use crate::docker::{ContainerEvent, DockerGateway};
use crate::sink::LogSink;
use futures::FutureExt;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Interval between reconciliation sweeps.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Registry of container ids with a live stream worker.
///
/// Insertion is check-and-set under one lock so two concurrent `start`
/// events cannot both claim the same container.
#[derive(Debug, Default)]
pub(crate) struct ActiveWorkers {
    entries: Mutex<HashSet<String>>,
}

impl ActiveWorkers {
    /// Claim a container id; false when a worker already holds it.
    fn try_insert(&self, container_id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(container_id.to_string())
    }

    fn remove(&self, container_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(container_id);
    }

    fn contains(&self, container_id: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.contains(container_id)
    }

    fn snapshot(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }
}

/// State shared by the supervisor, its workers, the reactor, and the cleaner.
pub(crate) struct Shared {
    pub(crate) gateway: Arc<dyn DockerGateway>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) parser: LogParser,
    pub(crate) monitored: Arc<MonitoredSet>,
    pub(crate) active: ActiveWorkers,
    pub(crate) buffers: Arc<UnstructuredBuffers>,
    pub(crate) cancel: CancellationToken,
}

impl Shared {
    /// Drop all in-memory state for a container.
    ///
    /// Used when a container stops, dies, or vanishes; the worker itself
    /// terminates when its log stream closes or its poller cancels it.
    pub(crate) fn dispose(&self, container_id: &str) {
        self.active.remove(container_id);
        self.buffers.remove(container_id);
        self.monitored.forget(container_id);
    }

    /// Launch a stream worker for `(container_id, container_name)`.
    ///
    /// Exactly one worker runs per container id; a duplicate request logs
    /// and returns without side effects.
    fn start_worker(self: &Arc<Self>, container_id: &str, container_name: &str) {
        if !self.active.try_insert(container_id) {
            info!(
                container_name = %container_name,
                "container logs are already being collected"
            );
            return;
        }
        self.buffers.insert(container_id, container_name);

        let shared = self.clone();
        let id = container_id.to_string();
        let name = container_name.to_string();
        let token = self.cancel.child_token();

        tokio::spawn(async move {
            let run = worker::run(shared.clone(), id.clone(), name.clone(), token);
            if std::panic::AssertUnwindSafe(run).catch_unwind().await.is_err() {
                error!(container_name = %name, "log worker panicked");
            }
            // State symmetry: no trace of the worker survives its exit.
            shared.active.remove(&id);
            shared.buffers.remove(&id);
        });
    }
}

/// Owner of the collection subsystem.
///
/// Construction wires the collaborators together; [`Collector::start`]
/// resolves the configured containers, launches their workers, and brings up
/// the event reactor and the cleaner. Everything winds down through the
/// cancellation token handed in at construction.
pub struct Collector {
    shared: Arc<Shared>,
}

impl Collector {
    /// Wire the collector against its collaborators.
    pub fn new(
        gateway: Arc<dyn DockerGateway>,
        sink: Arc<dyn LogSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: &CollectorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let buffers = Arc::new(UnstructuredBuffers::new());
        let parser = LogParser::new(
            sink,
            buffers.clone(),
            config.unstructured_line_flags.clone(),
            config.time_layouts.clone(),
        );
        let monitored = Arc::new(MonitoredSet::new(config.monitored_names.iter().cloned()));

        Self {
            shared: Arc::new(Shared {
                gateway,
                checkpoints,
                parser,
                monitored,
                active: ActiveWorkers::default(),
                buffers,
                cancel,
            }),
        }
    }

    /// Resolve configured containers, start their workers, and launch the
    /// event reactor and periodic cleaner.
    pub async fn start(&self) {
        for container_name in self.shared.monitored.names() {
            let container_id = match self.shared.gateway.resolve_name_to_id(&container_name).await
            {
                Ok(id) => id,
                Err(err) => {
                    error!(
                        container_name = %container_name,
                        error = %err,
                        "failed to resolve container id"
                    );
                    continue;
                }
            };

            self.shared.monitored.admit(&container_id);
            self.shared.start_worker(&container_id, &container_name);
        }

        tokio::spawn(run_event_reactor(
            self.shared.clone(),
            self.shared.cancel.clone(),
        ));
        tokio::spawn(run_cleaner(
            self.shared.clone(),
            self.shared.cancel.clone(),
        ));
    }

    /// Start a worker for a known container; duplicate requests are no-ops.
    pub fn start_worker(&self, container_id: &str, container_name: &str) {
        self.shared.start_worker(container_id, container_name);
    }

    /// Whether a worker currently streams this container.
    pub fn is_active(&self, container_id: &str) -> bool {
        self.shared.active.contains(container_id)
    }

    /// Ids of all currently streaming workers.
    pub fn active_ids(&self) -> Vec<String> {
        self.shared.active.snapshot()
    }

    /// Whether an unstructured buffer exists for this container.
    pub fn has_buffer(&self, container_id: &str) -> bool {
        self.shared.buffers.contains(container_id)
    }

    /// Handle to the monitored-set registry.
    pub fn monitored(&self) -> Arc<MonitoredSet> {
        self.shared.monitored.clone()
    }
}

/// Consume the daemon's container event stream and mutate collector state.
async fn run_event_reactor(shared: Arc<Shared>, cancel: CancellationToken) {
    info!("start watching Docker events");

    let mut events = shared.gateway.watch_events();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("stop watching Docker events");
                return;
            }
            item = events.next() => match item {
                None => {
                    warn!("Docker event stream closed");
                    return;
                }
                Some(Ok(event)) => handle_event(&shared, event).await,
                Some(Err(err)) if err.is_canceled() => {
                    info!("Docker event watcher finished");
                    return;
                }
                Some(Err(err)) => {
                    error!(error = %err, "Docker event watcher failed");
                    return;
                }
            }
        }
    }
}

/// React to one container event.
async fn handle_event(shared: &Arc<Shared>, event: ContainerEvent) {
    let container_id = event.actor_id;
    if container_id.is_empty() {
        return;
    }

    // Fast path: the daemon usually includes the name in the attributes,
    // which spares a lookup that would 404 for destroyed containers.
    let container_name = if let Some(name) = event.name {
        if !shared.monitored.contains(&name) {
            return;
        }
        shared.monitored.admit(&container_id);
        name
    } else {
        match shared.monitored.is_monitored(&container_id) {
            Monitored::No => return,
            verdict => {
                let name = match shared.gateway.resolve_id_to_name(&container_id).await {
                    Ok(name) => name,
                    Err(err) if err.is_not_found() => {
                        warn!(
                            action = %event.action,
                            container_id = %container_id,
                            "container not found, ignore Docker event"
                        );
                        shared.dispose(&container_id);
                        return;
                    }
                    Err(err) if err.is_canceled() => return,
                    Err(err) => {
                        error!(container_id = %container_id, error = %err, "failed to resolve container name");
                        return;
                    }
                };

                if verdict == Monitored::Unknown {
                    if shared.monitored.contains(&name) {
                        shared.monitored.admit(&container_id);
                    } else {
                        shared.monitored.block(&container_id);
                        return;
                    }
                }
                name
            }
        }
    };

    info!(action = %event.action, container_name = %container_name, "received container event");

    match event.action.as_str() {
        "start" => shared.start_worker(&container_id, &container_name),
        "stop" | "die" | "destroy" => shared.dispose(&container_id),
        _ => {}
    }
}

/// Hourly sweep: drop state for containers that are gone or stopped.
async fn run_cleaner(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("stop inactive container cleanup");
                return;
            }
            _ = ticker.tick() => {}
        }

        info!("start cleaning inactive container collectors");

        for container_id in shared.active.snapshot() {
            match shared.gateway.inspect_state(&container_id).await {
                Ok(state) if state.is_running() => {}
                Ok(_) => {
                    shared.dispose(&container_id);
                    info!(container_id = %container_id, "cleaned inactive container collector");
                }
                Err(err) if err.is_not_found() => {
                    info!(container_id = %container_id, "container not found, cleaning collector state");
                    shared.dispose(&container_id);
                }
                Err(err) if err.is_canceled() => {
                    info!(container_id = %container_id, "cleanup sweep canceled");
                }
                Err(err) => {
                    error!(container_id = %container_id, error = %err, "failed to inspect container during cleanup");
                }
            }
        }

        info!("finished cleaning inactive container collectors");
    }
}
