//! Connection management for the external compute worker: spawning it, multiplexing requests
//! over its single Unix-socket connection, and tearing it down cleanly.

pub mod client;
pub mod error;
pub mod lifecycle;

pub use client::ComputeClient;
pub use error::ComputeError;
pub use lifecycle::{shutdown, WORKER_SHUTDOWN_GRACE};

#[cfg(test)]
mod tests {
    use super::*;

    // ComputeClient::spawn always execs a worker binary, so exercising the reader loop and
    // request/response plumbing end to end belongs with weave_server's integration tests, which
    // spawn a small fake-worker binary over a real process boundary. This crate's unit tests
    // cover the parts that don't need a subprocess.

    #[test]
    fn worker_shutdown_grace_is_shorter_than_global_shutdown_grace() {
        assert!(WORKER_SHUTDOWN_GRACE < std::time::Duration::from_secs(30));
    }

    #[test]
    fn compute_errors_render_useful_messages() {
        let err = ComputeError::ReadTimeout(std::time::Duration::from_secs(5));
        assert!(format!("{err}").contains("timed out"));

        let err = ComputeError::WorkerError {
            code: 500,
            message: "out of memory".into(),
        };
        assert!(format!("{err}").contains("out of memory"));
    }
}
