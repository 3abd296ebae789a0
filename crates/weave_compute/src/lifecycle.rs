//! Orderly shutdown of a compute worker connection: close the link, ask nicely, then insist.

use std::time::Duration;

use tracing::{info, warn};

use crate::client::ComputeClient;
use crate::error::ComputeError;

/// Grace period between SIGTERM and SIGKILL when tearing down the compute worker. Distinct from
/// the longer grace period the server itself gets during a global shutdown.
pub const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Shuts the compute worker down: aborts the reader task, sends SIGTERM, waits up to
/// [`WORKER_SHUTDOWN_GRACE`] for the process to exit on its own, then SIGKILLs it, and finally
/// removes the socket file.
pub async fn shutdown(client: &ComputeClient) -> Result<(), ComputeError> {
    client.reader_task().abort();

    {
        let mut child = client.child().lock().await;
        if let Some(pid) = child.id() {
            info!(pid, "sending SIGTERM to compute worker");
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let waited = tokio::time::timeout(WORKER_SHUTDOWN_GRACE, child.wait()).await;
        match waited {
            Ok(Ok(status)) => info!(?status, "compute worker exited after SIGTERM"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for compute worker to exit"),
            Err(_) => {
                warn!("compute worker did not exit within grace period, sending SIGKILL");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to SIGKILL compute worker");
                }
                let _ = child.wait().await;
            }
        }
    }

    if client.socket_path().exists() {
        if let Err(e) = std::fs::remove_file(client.socket_path()) {
            warn!(error = %e, path = %client.socket_path().display(), "failed to remove compute socket file");
        }
    }

    Ok(())
}
