//! Failure modes of talking to the external compute worker.

use thiserror::Error;

/// Everything that can go wrong on the Unix-socket link to the compute worker, as distinct from
/// a decoded error response (see [`weave_protocol::GenerationError`]), which means the worker
/// itself ran and reported failure.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The reader task that demultiplexes responses has exited; the connection is unusable.
    #[error("compute connection reader task is no longer running")]
    ReaderDead,

    /// The socket connection to the compute worker dropped mid-request.
    #[error("compute connection closed")]
    ConnectionClosed,

    /// No response arrived for a request within the configured timeout.
    #[error("compute request timed out after {0:?}")]
    ReadTimeout(std::time::Duration),

    /// A frame declared a payload larger than the protocol allows.
    #[error("compute response payload too large: {0} bytes")]
    PayloadTooLarge(u32),

    /// The worker process could not be spawned.
    #[error("failed to spawn compute worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Setting up the listening socket (bind, permissions, stale-file cleanup) failed.
    #[error("failed to set up compute socket at {path}: {source}")]
    SocketSetup {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker never connected to our listener within the startup timeout.
    #[error("compute worker did not connect within {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// I/O failure while reading or writing a frame.
    #[error("compute connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame failed to decode.
    #[error("compute protocol error: {0}")]
    Codec(#[from] weave_protocol::CodecError),

    /// The worker reported a generation failure for this request.
    #[error("compute worker reported error {code}: {message}")]
    WorkerError { code: u16, message: String },
}
