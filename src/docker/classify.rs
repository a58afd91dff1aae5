//! Error classification helpers.
//!
//! The collector only distinguishes three outcomes of a gateway call: the
//! container vanished, the surrounding task was canceled, or a real fault.
//! Typed checks come first; both predicates fall back to case-insensitive
//! substring matching because errors picked up through hyper and the Docker
//! HTTP transport do not always keep their classification.

use super::DockerError;
use bollard::errors::Error as BollardError;

/// Reports whether an error indicates container non-existence.
pub(super) fn is_not_found(err: &DockerError) -> bool {
    match err {
        DockerError::NotFound(_) => true,
        DockerError::Api(BollardError::DockerResponseServerError {
            status_code: 404, ..
        }) => true,
        other => other.to_string().to_lowercase().contains("not found"),
    }
}

/// Reports whether an error indicates cancellation or a lapsed deadline.
pub(super) fn is_canceled(err: &DockerError) -> bool {
    if let DockerError::Api(BollardError::IOError { err: io_err }) = err {
        if matches!(
            io_err.kind(),
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
        ) {
            return true;
        }
    }

    let msg = err.to_string().to_lowercase();
    msg.contains("canceled")
        || msg.contains("cancelled")
        || msg.contains("deadline exceeded")
        || msg.contains("operation timed out")
}
