//! The server-side half of the compute worker connection: spawns the worker, accepts its single
//! connection, and multiplexes concurrent requests over it by request id.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{unix::OwnedWriteHalf, UnixListener};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use weave_protocol::{decode_response, encode_request, EncodeRequest, GenerationResponse, ImageResult, HEADER_LEN};

use crate::error::ComputeError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Maximum frame payload the reader accepts before allocating a buffer for it.
const MAX_PAYLOAD_LEN: usize = 10 * 1024 * 1024;

type PendingMap = Arc<DashMap<u64, oneshot::Sender<Result<GenerationResponse, ComputeError>>>>;

/// A live connection to the compute worker process, plus the machinery to talk to it.
pub struct ComputeClient {
    socket_path: PathBuf,
    write_half: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_request_id: AtomicU64,
    reader_task: tokio::task::JoinHandle<()>,
    child: Mutex<Child>,
    // Kept open so the worker observes EOF on its stdin if this process dies; see shutdown().
    _child_stdin: tokio::process::ChildStdin,
}

impl ComputeClient {
    /// Spawns `worker_binary --socket-path <path>`, accepts its one connection, and returns a
    /// client ready to issue requests. `runtime_dir` should be a directory only this user can
    /// read (typically the per-session runtime directory under `XDG_RUNTIME_DIR` or similar).
    pub async fn spawn(
        worker_binary: &Path,
        runtime_dir: &Path,
        socket_name: &str,
    ) -> Result<Self, ComputeError> {
        let socket_path = runtime_dir.join(socket_name);
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(|source| ComputeError::SocketSetup {
                path: socket_path.clone(),
                source,
            })?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|source| ComputeError::SocketSetup {
            path: socket_path.clone(),
            source,
        })?;
        set_owner_only_permissions(&socket_path)?;

        let mut child = Command::new(worker_binary)
            .arg("--socket-path")
            .arg(&socket_path)
            .stdin(std::process::Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(ComputeError::Spawn)?;
        let child_stdin = child.stdin.take().expect("stdin was piped");

        let (stream, _addr) = timeout(DEFAULT_CONNECT_TIMEOUT, listener.accept())
            .await
            .map_err(|_| ComputeError::ConnectTimeout(DEFAULT_CONNECT_TIMEOUT))?
            .map_err(ComputeError::Io)?;
        info!(socket_path = %socket_path.display(), "compute worker connected");

        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(DashMap::new());
        let reader_task = tokio::spawn(reader_loop(read_half, pending.clone()));

        Ok(ComputeClient {
            socket_path,
            write_half: Mutex::new(write_half),
            pending,
            next_request_id: AtomicU64::new(1),
            reader_task,
            child: Mutex::new(child),
            _child_stdin: child_stdin,
        })
    }

    /// Sends a generation request and awaits the matching response, correlated by request id.
    pub async fn generate(&self, mut req: EncodeRequest) -> Result<ImageResult, ComputeError> {
        if self.reader_task.is_finished() {
            return Err(ComputeError::ReaderDead);
        }

        req.request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_request(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(req.request_id, tx);

        {
            let mut writer = self.write_half.lock().await;
            if let Err(e) = writer.write_all(&frame).await {
                self.pending.remove(&req.request_id);
                return Err(ComputeError::Io(e));
            }
        }

        let response = match timeout(DEFAULT_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                self.pending.remove(&req.request_id);
                return Err(ComputeError::ConnectionClosed);
            }
            Err(_) => {
                self.pending.remove(&req.request_id);
                return Err(ComputeError::ReadTimeout(DEFAULT_REQUEST_TIMEOUT));
            }
        };

        match response {
            GenerationResponse::Ok(result) => Ok(result),
            GenerationResponse::Err(err) => Err(ComputeError::WorkerError {
                code: err.code,
                message: err.message,
            }),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub(crate) fn reader_task(&self) -> &tokio::task::JoinHandle<()> {
        &self.reader_task
    }

    pub(crate) fn child(&self) -> &Mutex<Child> {
        &self.child
    }
}

async fn reader_loop(mut read_half: tokio::net::unix::OwnedReadHalf, pending: PendingMap) {
    let exit_error = loop {
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(e) = read_half.read_exact(&mut header_buf).await {
            warn!(error = %e, "compute connection closed while reading header");
            break ComputeError::ReaderDead;
        }

        let payload_len = u32::from_be_bytes([header_buf[8], header_buf[9], header_buf[10], header_buf[11]]) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            error!(payload_len, "compute response declared an oversized payload; dropping connection");
            break ComputeError::PayloadTooLarge(payload_len as u32);
        }
        let mut frame = Vec::with_capacity(HEADER_LEN + payload_len);
        frame.extend_from_slice(&header_buf);
        frame.resize(HEADER_LEN + payload_len, 0);
        if let Err(e) = read_half.read_exact(&mut frame[HEADER_LEN..]).await {
            warn!(error = %e, "compute connection closed while reading payload");
            break ComputeError::ReaderDead;
        }

        match decode_response(&frame) {
            Ok(response) => {
                let request_id = response.request_id();
                if let Some((_, tx)) = pending.remove(&request_id) {
                    let _ = tx.send(Ok(response));
                } else {
                    debug!(request_id, "dropping response with no matching pending request");
                }
            }
            Err(e) => {
                error!(error = %e, "failed to decode compute response frame");
            }
        }
    };

    // The reader is gone for good at this point; every outstanding RPC can never receive a
    // reply, so they all fail the same way regardless of what ended the loop.
    let stale: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for request_id in stale {
        if let Some((_, tx)) = pending.remove(&request_id) {
            let _ = tx.send(Err(match &exit_error {
                ComputeError::PayloadTooLarge(n) => ComputeError::PayloadTooLarge(*n),
                _ => ComputeError::ReaderDead,
            }));
        }
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), ComputeError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        ComputeError::SocketSetup {
            path: path.to_owned(),
            source,
        }
    })
}
