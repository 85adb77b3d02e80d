//! `teeproxy health`: query the admin listener of a running proxy.

use std::fmt::Write as _;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::cli::HealthArgs;
use crate::error::TeeError;
use crate::health::HealthResponse;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn execute(args: HealthArgs) -> Result<(), TeeError> {
    let uri = health_uri(&args.url)?;
    let (status, body) = fetch(uri).await?;
    if !status.is_success() {
        return Err(TeeError::HealthCheckFailed(status));
    }

    let raw = String::from_utf8_lossy(&body);
    if args.json {
        println!("{raw}");
        return Ok(());
    }

    match serde_json::from_slice::<HealthResponse>(&body) {
        Ok(health) => print!("{}", summary(&health, &args.url)),
        Err(e) => {
            eprintln!("unrecognised health payload: {e}");
            println!("{raw}");
        }
    }
    Ok(())
}

/// `{base}/health`, tolerating a trailing slash on the base URL.
pub fn health_uri(base: &str) -> Result<Uri, TeeError> {
    format!("{}/health", base.trim_end_matches('/'))
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| TeeError::UriParse {
            source: Box::new(e),
        })
}

async fn fetch(uri: Uri) -> Result<(StatusCode, Bytes), TeeError> {
    let client: Client<HttpConnector, Empty<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();

    let exchange = async {
        let response = client.get(uri).await.map_err(request_failed)?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(request_failed)?
            .to_bytes();
        Ok((status, body))
    };

    tokio::time::timeout(HEALTH_TIMEOUT, exchange)
        .await
        .map_err(|_| TeeError::HttpRequest {
            source: format!("no answer within {}s", HEALTH_TIMEOUT.as_secs()).into(),
        })?
}

fn request_failed<E>(e: E) -> TeeError
where
    E: std::error::Error + Send + Sync + 'static,
{
    TeeError::HttpRequest {
        source: Box::new(e),
    }
}

/// Human-readable report of a health payload.
#[must_use]
pub fn summary(health: &HealthResponse, url: &str) -> String {
    let counter = |key: &str| health.metrics.get(key).copied().unwrap_or(0);
    let rewrite = |on: bool| if on { ", host rewritten" } else { "" };
    let cfg = &health.config;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "teeproxy {} ({}) at {url}: {}",
        health.version, health.commit, health.status
    );
    let _ = writeln!(
        out,
        "  {} on {}, up {}",
        health.service_name,
        health.hostname,
        format_uptime(health.uptime_seconds)
    );
    let _ = writeln!(
        out,
        "  config {}{}",
        cfg.version,
        if cfg.tls { ", TLS listener" } else { "" }
    );
    let _ = writeln!(
        out,
        "  primary {}{}",
        cfg.primary.address,
        rewrite(cfg.primary.host_rewrite)
    );
    let _ = writeln!(
        out,
        "  shadow  {}{}, {}% mirrored",
        cfg.shadow.address,
        rewrite(cfg.shadow.host_rewrite),
        cfg.percent
    );
    let _ = writeln!(
        out,
        "  requests {} in, {} rejected",
        counter("http.in.req"),
        counter("http.in.rejected")
    );
    out
}

#[must_use]
pub fn format_uptime(seconds: u64) -> String {
    let (days, rest) = (seconds / 86_400, seconds % 86_400);
    let (hours, rest) = (rest / 3600, rest % 3600);
    let (minutes, secs) = (rest / 60, rest % 60);
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{secs}s"),
        (0, 0, _) => format!("{minutes}m {secs}s"),
        (0, _, _) => format!("{hours}h {minutes}m {secs}s"),
        _ => format!("{days}d {hours}h {minutes}m"),
    }
}
