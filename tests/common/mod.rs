//! Shared test doubles for collector integration tests.
//!
//! `FakeGateway` replaces the Docker Engine with scripted containers, log
//! streams, and a pushable event channel so tests can drive the collector
//! through lifecycle scenarios without a daemon.

use async_trait::async_trait;
use bytes::Bytes;
use dockstream::docker::{
    ContainerEvent, ContainerState, DockerError, DockerGateway, EventStream, LogStream,
};
use dockstream::entry::LogEntry;
use dockstream::sink::{LogSink, MemorySink, SinkError};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};

/// One scripted log stream: chunks handed out in order, then either a clean
/// close or an open stream that only ends on worker cancellation.
pub struct ScriptedStream {
    pub chunks: Vec<Bytes>,
    pub hold_open: bool,
}

impl ScriptedStream {
    pub fn closed(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks,
            hold_open: false,
        }
    }

    pub fn open(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks,
            hold_open: true,
        }
    }
}

#[derive(Clone)]
struct FakeContainer {
    name: String,
    state: ContainerState,
}

/// Scripted Docker Engine for collector tests.
pub struct FakeGateway {
    containers: Mutex<HashMap<String, FakeContainer>>,
    streams: Mutex<HashMap<String, VecDeque<ScriptedStream>>>,
    since_seen: Mutex<Vec<(String, Option<String>)>>,
    open_count: AtomicUsize,
    events_tx: UnboundedSender<Result<ContainerEvent, DockerError>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<ContainerEvent, DockerError>>>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            containers: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            since_seen: Mutex::new(Vec::new()),
            open_count: AtomicUsize::new(0),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        })
    }

    /// Register a container the gateway knows about.
    pub fn add_container(&self, id: &str, name: &str, state: ContainerState) {
        self.containers.lock().unwrap().insert(
            id.to_string(),
            FakeContainer {
                name: name.to_string(),
                state,
            },
        );
    }

    /// Change a container's reported state.
    pub fn set_state(&self, id: &str, state: ContainerState) {
        if let Some(container) = self.containers.lock().unwrap().get_mut(id) {
            container.state = state;
        }
    }

    /// Make the container vanish: inspects and resolutions return not-found.
    pub fn remove_container(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    /// Queue a scripted log stream for a container; streams are handed out
    /// in push order, one per `open_log_stream` call.
    pub fn push_stream(&self, id: &str, stream: ScriptedStream) {
        self.streams
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(stream);
    }

    /// Emit a container event to the reactor.
    pub fn send_event(&self, action: &str, actor_id: &str, name: Option<&str>) {
        let _ = self.events_tx.send(Ok(ContainerEvent {
            action: action.to_string(),
            actor_id: actor_id.to_string(),
            name: name.map(String::from),
        }));
    }

    /// How many log streams have been opened in total.
    pub fn opened_streams(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// `since` values passed to `open_log_stream`, in call order.
    pub fn since_values(&self) -> Vec<(String, Option<String>)> {
        self.since_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DockerGateway for FakeGateway {
    async fn ping(&self) -> Result<(), DockerError> {
        Ok(())
    }

    async fn resolve_name_to_id(&self, name: &str) -> Result<String, DockerError> {
        let containers = self.containers.lock().unwrap();
        containers
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| DockerError::NotFound(name.to_string()))
    }

    async fn resolve_id_to_name(&self, id: &str) -> Result<String, DockerError> {
        let containers = self.containers.lock().unwrap();
        containers
            .get(id)
            .map(|c| c.name.clone())
            .ok_or_else(|| DockerError::NotFound(id.to_string()))
    }

    async fn inspect_state(&self, id: &str) -> Result<ContainerState, DockerError> {
        let containers = self.containers.lock().unwrap();
        containers
            .get(id)
            .map(|c| c.state)
            .ok_or_else(|| DockerError::NotFound(id.to_string()))
    }

    async fn open_log_stream(&self, id: &str, since: Option<&str>) -> Result<LogStream, DockerError> {
        self.since_seen
            .lock()
            .unwrap()
            .push((id.to_string(), since.map(String::from)));

        let scripted = self
            .streams
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front);

        let Some(scripted) = scripted else {
            return Err(DockerError::NotFound(id.to_string()));
        };

        self.open_count.fetch_add(1, Ordering::SeqCst);

        let chunks = futures::stream::iter(scripted.chunks.into_iter().map(Ok));
        if scripted.hold_open {
            Ok(Box::pin(chunks.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(chunks))
        }
    }

    fn watch_events(&self) -> EventStream {
        let rx = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch_events called more than once");

        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }
}

/// Sink that rejects any entry whose message contains a marker string,
/// recording everything else in an inner [`MemorySink`].
pub struct RejectingSink {
    pub inner: MemorySink,
    marker: String,
}

impl RejectingSink {
    pub fn new(marker: &str) -> Self {
        Self {
            inner: MemorySink::new(),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl LogSink for RejectingSink {
    async fn store(&self, entry: LogEntry) -> Result<i64, SinkError> {
        if entry.message.contains(&self.marker) {
            return Err(SinkError::Rejected("scripted rejection".to_string()));
        }
        self.inner.store(entry).await
    }
}

/// Build a timestamped log line the way the daemon emits them.
pub fn frame_line(frame_time: &str, payload: &str) -> Bytes {
    Bytes::from(format!("{frame_time} {payload}\n"))
}

/// Same line wrapped in an 8-byte stdcopy frame header.
pub fn muxed_frame_line(frame_time: &str, payload: &str) -> Bytes {
    let body = format!("{frame_time} {payload}\n");
    let mut framed = Vec::with_capacity(body.len() + 8);
    framed.push(1u8); // stdout stream id
    framed.extend_from_slice(&[0, 0, 0]);
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(body.as_bytes());
    Bytes::from(framed)
}

/// Poll until `check` passes or the deadline expires.
pub async fn wait_until<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
