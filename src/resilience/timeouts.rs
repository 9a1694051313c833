//! Detached, deadline-bounded cleanup.
//!
//! # Responsibilities
//! - Run release work on its own task so a cancelled caller cannot abort it
//! - Bound that work with a deadline independent of the caller's
//! - Log and count failures instead of returning them
//!
//! # Design Decisions
//! - A lost release is tolerable: the slot or waiter expires by TTL
//! - Without a runtime (e.g. a guard dropped after shutdown) nothing is spawned

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::store::StoreResult;

/// Spawn `work` with its own deadline. `what` names the cleanup in logs.
///
/// Returns `None` when called outside a Tokio runtime.
pub fn spawn_release<F>(what: &'static str, deadline: Duration, work: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = StoreResult<()>> + Send + 'static,
{
    let handle = match Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            tracing::warn!(kind = what, "No runtime available for release; relying on TTL expiry");
            metrics::record_release_failure(what);
            return None;
        }
    };

    Some(handle.spawn(async move {
        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(kind = what, error = %e, "Release failed; relying on TTL expiry");
                metrics::record_release_failure(what);
            }
            Err(_) => {
                tracing::warn!(
                    kind = what,
                    timeout_ms = deadline.as_millis() as u64,
                    "Release timed out; relying on TTL expiry"
                );
                metrics::record_release_failure(what);
            }
        }
    }))
}

/// Spawn `work` and wait for it. Dropping the returned future does not cancel
/// the release.
pub async fn release_detached<F>(what: &'static str, deadline: Duration, work: F)
where
    F: Future<Output = StoreResult<()>> + Send + 'static,
{
    if let Some(task) = spawn_release(what, deadline, work) {
        if let Err(e) = task.await {
            tracing::warn!(kind = what, error = %e, "Release task aborted");
        }
    }
}
