//! Per-container stream worker.
//!
//! One worker owns one container's follow-mode log stream: it resumes from
//! the stored checkpoint, reassembles lines across chunk boundaries, strips
//! stdcopy frame headers when the daemon multiplexes, splits off the frame
//! timestamp, hands payloads to the parser, and advances the checkpoint. A
//! sibling poller watches container state and cancels the worker when the
//! container stops running.

use crate::checkpoint::checkpoint_key;
use crate::collector::sanitize::{contains_unprintable, to_valid_utf8};
use crate::collector::supervisor::Shared;
use crate::docker::ContainerState;
use bytes::BytesMut;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Interval between container state polls.
const STATE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Length of the stdcopy frame header: stream id, 3 pad bytes, u32 length.
const FRAME_HEADER_LEN: usize = 8;

/// Stream one container's logs until the stream closes or the token fires.
///
/// The caller removes the worker from `ActiveWorkers` and drops its buffer
/// after this returns; vanished-container paths additionally forget the id.
pub(crate) async fn run(
    shared: Arc<Shared>,
    container_id: String,
    container_name: String,
    token: CancellationToken,
) {
    let key = checkpoint_key(&container_name);

    let since = match shared.checkpoints.get(&key).await {
        Ok(value) => value,
        Err(err) => {
            error!(container_name = %container_name, error = %err, "failed to read checkpoint, starting from stream head");
            None
        }
    };

    let stream = match shared
        .gateway
        .open_log_stream(&container_id, since.as_deref())
        .await
    {
        Ok(stream) => stream,
        Err(err) if err.is_not_found() => {
            warn!(container_name = %container_name, "container vanished before log stream opened");
            shared.monitored.forget(&container_id);
            return;
        }
        Err(err) if err.is_canceled() => {
            return;
        }
        Err(err) => {
            error!(container_name = %container_name, error = %err, "failed to open container logs");
            return;
        }
    };

    // Sibling poller: cancels this worker once the container stops running.
    let poller = tokio::spawn(poll_container_state(
        shared.clone(),
        container_id.clone(),
        container_name.clone(),
        token.clone(),
    ));

    info!(container_name = %container_name, "start collecting container logs");

    let mut stream = stream;
    let mut buf = BytesMut::new();

    let ended_clean = loop {
        tokio::select! {
            _ = token.cancelled() => break false,
            item = stream.next() => match item {
                None => break true,
                Some(Ok(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let line = buf.split_to(pos + 1);
                        handle_line(&shared, trim_line(&line), &key, &container_id, &container_name)
                            .await;
                    }
                }
                Some(Err(err)) => {
                    if err.is_canceled() {
                        info!(container_name = %container_name, "log stream canceled");
                    } else {
                        error!(container_name = %container_name, error = %err, "failed to read container logs");
                    }
                    break false;
                }
            }
        }
    };

    // The daemon may close the stream without a final newline.
    if ended_clean && !buf.is_empty() {
        let line = buf.split_to(buf.len());
        handle_line(&shared, trim_line(&line), &key, &container_id, &container_name).await;
    }

    // Drain whatever unstructured block is still open.
    shared.parser.flush(&container_id).await;

    info!(container_name = %container_name, "container log collection finished");

    token.cancel();
    let _ = poller.await;
}

/// Process one reassembled line: frame strip, timestamp split, parse,
/// checkpoint advance.
async fn handle_line(
    shared: &Shared,
    line: &[u8],
    key: &str,
    container_id: &str,
    container_name: &str,
) {
    // A line this short carries no frame timestamp; nothing to collect.
    if line.len() <= FRAME_HEADER_LEN {
        return;
    }

    // Multiplexed streams prefix each frame with an 8-byte binary header;
    // TTY containers arrive unmuxed and must pass through untouched.
    let line = if contains_unprintable(&line[..FRAME_HEADER_LEN]) {
        &line[FRAME_HEADER_LEN..]
    } else {
        line
    };

    let text = to_valid_utf8(line);
    let (frame_time, payload) = match text.split_once(' ') {
        Some((time, rest)) => (time, rest),
        None => ("", text.as_str()),
    };

    match shared
        .parser
        .process(frame_time, payload, container_id, container_name)
        .await
    {
        Ok(()) => {
            if let Err(err) = shared.checkpoints.set(key, frame_time).await {
                error!(container_name, error = %err, "failed to update checkpoint");
            }
        }
        Err(_) => {
            // Entry was rejected by the sink; leave the checkpoint so a
            // restart can retry this line.
        }
    }
}

/// Strip the line terminator (`\n`, optionally preceded by `\r`).
fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    &line[..end]
}

/// Poll container state every five seconds; cancel the worker when the
/// container is gone or no longer running.
async fn poll_container_state(
    shared: Arc<Shared>,
    container_id: String,
    container_name: String,
    token: CancellationToken,
) {
    // A container that is not running at worker start gets no poller; the
    // log stream simply drains history and closes.
    match shared.gateway.inspect_state(&container_id).await {
        Ok(state) if state.is_running() => {}
        _ => return,
    }

    let mut ticker = tokio::time::interval(STATE_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        // Cancellation makes the worker drain its buffer and clean up after
        // itself; only the monitored-set entry is dropped here.
        match shared.gateway.inspect_state(&container_id).await {
            Ok(ContainerState::Running) => {}
            Ok(state) => {
                info!(container_name = %container_name, state = %state, "container has stopped");
                shared.monitored.forget(&container_id);
                token.cancel();
                return;
            }
            Err(err) if err.is_canceled() => {
                token.cancel();
                return;
            }
            Err(err) if err.is_not_found() => {
                warn!(container_name = %container_name, "container not found, stop state monitoring");
                shared.monitored.forget(&container_id);
                token.cancel();
                return;
            }
            Err(err) => {
                error!(container_name = %container_name, error = %err, "failed to get container state");
                token.cancel();
                return;
            }
        }
    }
}
