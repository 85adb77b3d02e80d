//! One request, one fresh connection.
//!
//! [`exchange`] dials the backend with a connect timeout, applies the
//! target's host rewrite, writes the envelope over an HTTP/1 connection
//! and reads the full response. Both forwarders use it; they differ only
//! in what they do with the result. There is no pooling and no retry: the
//! connection is closed once the response is read or the exchange fails.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::response::Parts;
use http::StatusCode;
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use super::envelope::RequestEnvelope;
use crate::error::{FailureKind, ForwardError};
use crate::metrics::{MetricsSink, Scope};

/// Where and how to forward. Built once from config, never mutated.
#[derive(Debug, Clone)]
pub struct BackendTarget {
    pub address: String,
    pub connect_timeout: Duration,
    pub host_rewrite: bool,
    /// Bound on write + read once connected. `None` leaves it unbounded.
    pub exchange_timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct BackendResponse {
    pub parts: Parts,
    pub body: Bytes,
}

/// Result of one forward, for metrics and logs only.
#[derive(Debug)]
pub struct ForwardOutcome {
    pub result: Result<StatusCode, FailureKind>,
    pub latency: Duration,
}

impl ForwardOutcome {
    #[must_use]
    pub fn of(result: &Result<BackendResponse, ForwardError>, latency: Duration) -> Self {
        Self {
            result: result
                .as_ref()
                .map(|r| r.parts.status)
                .map_err(ForwardError::kind),
            latency,
        }
    }

    /// Status counter on success, failure counter otherwise; latency only
    /// when a response was fully read.
    pub fn record(&self, metrics: &dyn MetricsSink, scope: Scope) {
        match &self.result {
            Ok(status) => {
                metrics.timing(scope, "latency", self.latency);
                metrics.increment(scope, status.as_str());
            }
            Err(kind) => metrics.increment(scope, kind.metric_name()),
        }
    }
}

pub async fn exchange(
    mut envelope: RequestEnvelope,
    target: &BackendTarget,
) -> Result<BackendResponse, ForwardError> {
    let stream = connect(target).await?;

    if target.host_rewrite {
        envelope.rewrite_host(&target.address);
    }

    let pending = send(stream, envelope, &target.address);
    match target.exchange_timeout {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .map_err(|_| ForwardError::Timeout {
                addr: target.address.clone(),
                after: limit,
            })?,
        None => pending.await,
    }
}

/// Exchange, timed from dial to the last response byte.
pub async fn timed_exchange(
    envelope: RequestEnvelope,
    target: &BackendTarget,
) -> (Result<BackendResponse, ForwardError>, Duration) {
    let start = Instant::now();
    let result = exchange(envelope, target).await;
    (result, start.elapsed())
}

async fn connect(target: &BackendTarget) -> Result<TcpStream, ForwardError> {
    let dial = TcpStream::connect(target.address.as_str());
    match tokio::time::timeout(target.connect_timeout, dial).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(source)) => Err(ForwardError::Connect {
            addr: target.address.clone(),
            source,
        }),
        Err(_) => Err(ForwardError::Connect {
            addr: target.address.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no connection within {:?}", target.connect_timeout),
            ),
        }),
    }
}

async fn send(
    stream: TcpStream,
    envelope: RequestEnvelope,
    addr: &str,
) -> Result<BackendResponse, ForwardError> {
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| ForwardError::Write {
            addr: addr.to_string(),
            source: Box::new(e),
        })?;

    // Drives the socket; ends once `sender` is dropped and the response is read.
    let driver = tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::trace!(error = %e, "backend connection ended with error");
        }
    });

    let response = sender
        .send_request(envelope.into_request())
        .await
        .map_err(|e| classify(e, addr))?;
    drop(sender);

    let (parts, body) = response.into_parts();
    // A clean end of stream after the declared body is success, not an error.
    let body = body
        .collect()
        .await
        .map_err(|e| ForwardError::Read {
            addr: addr.to_string(),
            source: Box::new(e),
        })?
        .to_bytes();

    driver.abort();
    Ok(BackendResponse { parts, body })
}

/// Failures while parsing or waiting for the response head are read
/// failures; anything else happened while the request was going out.
fn classify(e: hyper::Error, addr: &str) -> ForwardError {
    let addr = addr.to_string();
    if e.is_parse() || e.is_parse_status() || e.is_incomplete_message() || e.is_timeout() {
        ForwardError::Read {
            addr,
            source: Box::new(e),
        }
    } else {
        ForwardError::Write {
            addr,
            source: Box::new(e),
        }
    }
}
