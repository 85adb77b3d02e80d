//! Detached background work with a fault boundary.
//!
//! [`spawn_detached`] runs a future on its own task and never hands back a
//! handle, so the caller cannot wait on it. A watcher task observes the
//! join result: a panic inside the job stops at that boundary and is
//! logged (at `warn` when `verbose`, `debug` otherwise). The process keeps
//! serving either way.
//!
//! Jobs still running at shutdown are dropped with the runtime.

use std::future::Future;

pub fn spawn_detached<F>(name: &'static str, verbose: bool, job: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(job);
    tokio::spawn(async move {
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                let reason = panic_message(e.into_panic());
                if verbose {
                    tracing::warn!(job = name, panic = %reason, "recovered from panic in background job");
                } else {
                    tracing::debug!(job = name, panic = %reason, "recovered from panic in background job");
                }
            }
            Err(e) => tracing::debug!(job = name, error = %e, "background job cancelled"),
        }
    });
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
