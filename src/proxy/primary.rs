//! The client-visible forward.
//!
//! The primary backend's response is relayed verbatim: status, headers in
//! their original order, and body. An unreachable backend becomes a 503
//! with an empty body. A backend that fails after the connection is up
//! yields an error, which the server turns into a dropped client
//! connection. Nothing is retried.

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::Full;

use super::envelope::RequestEnvelope;
use super::forward::{timed_exchange, BackendResponse, BackendTarget, ForwardOutcome};
use crate::error::ForwardError;
use crate::metrics::{MetricsSink, Scope};

pub async fn forward(
    envelope: RequestEnvelope,
    target: &BackendTarget,
    metrics: &dyn MetricsSink,
) -> Result<Response<Full<Bytes>>, ForwardError> {
    tracing::debug!(
        backend = %target.address,
        uri = %envelope.uri,
        close = envelope.close,
        "forwarding request to primary"
    );

    let (result, latency) = timed_exchange(envelope, target).await;
    ForwardOutcome::of(&result, latency).record(metrics, Scope::Primary);

    match result {
        Ok(BackendResponse { parts, body }) => {
            tracing::info!(
                backend = %target.address,
                status = parts.status.as_u16(),
                latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                "response from primary"
            );
            let mut response = Response::new(Full::new(body));
            *response.status_mut() = parts.status;
            *response.headers_mut() = parts.headers;
            Ok(response)
        }
        Err(e) if e.is_connect() => {
            tracing::warn!(
                backend = %target.address,
                error = %e,
                "failed to connect to primary backend"
            );
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            Ok(response)
        }
        Err(e) => {
            tracing::error!(
                backend = %target.address,
                error = %e,
                "primary exchange failed, dropping client connection"
            );
            Err(e)
        }
    }
}
