//! Listeners, connection serving, and graceful shutdown.
//!
//! [`serve_proxy`] runs the accept loop for the mirroring listener: one
//! task per connection, optional TLS handshake, then an HTTP/1 connection
//! driving [`MirrorProxy::handle`]. When the handler fails after the
//! primary backend connected, the service error makes hyper close the
//! client connection without writing a response.
//!
//! [`AppState`] and [`build_admin_router`] serve the optional admin
//! listener; [`shutdown_signal`] waits for SIGTERM / Ctrl+C.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::model::Identity;
use crate::error::TeeError;
use crate::health::health_handler;
use crate::metrics::Recorder;
use crate::proxy::MirrorProxy;

/// How long in-flight connections get to finish after shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// First pause after a failed accept; doubles per consecutive failure.
const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

fn next_accept_backoff(current: Duration) -> Duration {
    (current * 2).min(ACCEPT_BACKOFF_MAX)
}

pub struct AppState {
    pub proxy: Arc<MirrorProxy>,
    pub recorder: Arc<Recorder>,
    pub config_version: String,
    pub identity: Identity,
    pub tls: bool,
    pub start_time: Instant,
}

pub async fn bind(addr: &str) -> Result<TcpListener, TeeError> {
    TcpListener::bind(addr).await.map_err(|source| TeeError::Bind {
        addr: addr.to_string(),
        source,
    })
}

pub async fn serve_proxy(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    proxy: Arc<MirrorProxy>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Every connection task holds a clone; recv() yields None once all are gone.
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    let mut backoff = ACCEPT_BACKOFF_START;

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };

        let (stream, remote) = match accepted {
            Ok(conn) => {
                backoff = ACCEPT_BACKOFF_START;
                conn
            }
            Err(e) => {
                // Usually EMFILE or ENFILE.
                tracing::warn!(
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "accept failed"
                );
                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => break,
                }
                backoff = next_accept_backoff(backoff);
                continue;
            }
        };

        let proxy = Arc::clone(&proxy);
        let tls = tls.clone();
        let stop = shutdown.clone();
        let done = done_tx.clone();
        let span = tracing::info_span!("connection", remote = %remote);

        tokio::spawn(
            async move {
                match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => serve_connection(stream, proxy, stop).await,
                        Err(e) => tracing::debug!(error = %e, "TLS handshake failed"),
                    },
                    None => serve_connection(stream, proxy, stop).await,
                }
                drop(done);
            }
            .instrument(span),
        );
    }

    drop(listener);
    drop(done_tx);
    if tokio::time::timeout(DRAIN_TIMEOUT, done_rx.recv()).await.is_err() {
        tracing::warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "connections still open after drain timeout"
        );
    }
}

async fn serve_connection<IO>(io: IO, proxy: Arc<MirrorProxy>, mut stop: watch::Receiver<bool>)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let proxy = Arc::clone(&proxy);
        async move { proxy.handle(req).await }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = stop.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "connection closed with error");
    }
}

pub fn build_admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub async fn serve_admin(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TeeError> {
    let router = build_admin_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_backoff_doubles_up_to_cap() {
        let mut delay = ACCEPT_BACKOFF_START;
        let mut seen = vec![delay.as_millis()];
        for _ in 0..10 {
            delay = next_accept_backoff(delay);
            seen.push(delay.as_millis());
        }
        assert_eq!(
            seen,
            vec![5, 10, 20, 40, 80, 160, 320, 640, 1000, 1000, 1000]
        );
    }

    #[tokio::test]
    async fn shutdown_interrupts_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let recorder = Arc::new(Recorder::new());
        let target = |addr: &str| crate::proxy::forward::BackendTarget {
            address: addr.into(),
            connect_timeout: Duration::from_secs(1),
            host_rewrite: false,
            exchange_timeout: None,
        };
        let proxy = Arc::new(MirrorProxy::new(
            target("127.0.0.1:1"),
            target("127.0.0.1:1"),
            crate::proxy::sampler::Sampler::new(
                0.0,
                Arc::new(crate::proxy::sampler::SharedRng::seeded(1)),
            ),
            recorder,
        ));

        let serving = tokio::spawn(serve_proxy(listener, None, proxy, rx));
        let _ = tx.send(true);
        tokio::time::timeout(Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap();
    }
}
