//! The mirrored forward.
//!
//! Runs detached from the request that triggered it. The response body is
//! read to the end, for an accurate status and to let the connection
//! close, then discarded. Every failure ends up in a counter; logs about
//! it only appear in debug mode.

use std::sync::Arc;

use super::envelope::RequestEnvelope;
use super::forward::{timed_exchange, BackendTarget, ForwardOutcome};
use crate::metrics::{MetricsSink, Scope};

pub async fn forward_shadow(
    envelope: RequestEnvelope,
    target: Arc<BackendTarget>,
    metrics: Arc<dyn MetricsSink>,
    debug: bool,
) {
    tracing::debug!(
        backend = %target.address,
        uri = %envelope.uri,
        host = envelope.host_str(),
        "forwarding request to shadow"
    );

    let (result, latency) = timed_exchange(envelope, &target).await;
    ForwardOutcome::of(&result, latency).record(metrics.as_ref(), Scope::Shadow);

    match result {
        Ok(response) => tracing::debug!(
            backend = %target.address,
            status = response.parts.status.as_u16(),
            discarded_bytes = response.body.len(),
            latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            "response from shadow"
        ),
        Err(e) if debug => tracing::warn!(
            backend = %target.address,
            error = %e,
            "shadow forward failed"
        ),
        Err(_) => {}
    }
}
