//! Integration tests for the admin health endpoint and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

use teeproxy::config::model::Identity;
use teeproxy::health::HealthResponse;
use teeproxy::metrics::{MetricsSink, Recorder, Scope};
use teeproxy::proxy::forward::BackendTarget;
use teeproxy::proxy::sampler::{Sampler, SharedRng};
use teeproxy::proxy::MirrorProxy;
use teeproxy::server::{self, AppState};

fn target(addr: &str) -> BackendTarget {
    BackendTarget {
        address: addr.into(),
        connect_timeout: Duration::from_secs(1),
        host_rewrite: true,
        exchange_timeout: Some(Duration::from_secs(5)),
    }
}

fn test_proxy(primary: &str, recorder: Arc<Recorder>) -> Arc<MirrorProxy> {
    Arc::new(MirrorProxy::new(
        target(primary),
        target("127.0.0.1:1"),
        Sampler::new(25.0, Arc::new(SharedRng::seeded(5))),
        recorder,
    ))
}

async fn start_admin() -> (SocketAddr, Arc<Recorder>, watch::Sender<bool>) {
    let recorder = Arc::new(Recorder::new());
    let state = Arc::new(AppState {
        proxy: test_proxy("127.0.0.1:2", recorder.clone()),
        recorder: recorder.clone(),
        config_version: "abcdef0123456789".into(),
        identity: Identity {
            service_name: "checkout-mirror".into(),
            hostname: "proxy-1".into(),
        },
        tls: false,
        start_time: Instant::now(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        server::serve_admin(listener, state, shutdown_rx)
            .await
            .unwrap();
    });

    (addr, recorder, shutdown_tx)
}

#[tokio::test]
async fn health_endpoint_returns_healthy() {
    let (addr, _recorder, _shutdown) = start_admin().await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let health: HealthResponse = resp.json().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.service_name, "checkout-mirror");
    assert_eq!(health.hostname, "proxy-1");
    assert_eq!(health.config.version, "abcdef01");
    assert_eq!(health.config.primary.address, "127.0.0.1:2");
    assert!(health.config.primary.host_rewrite);
    assert!((health.config.percent - 25.0).abs() < f64::EPSILON);
    assert!(!health.config.tls);
    assert!(health.metrics.is_empty());
}

#[tokio::test]
async fn health_reports_recorded_counters() {
    let (addr, recorder, _shutdown) = start_admin().await;
    recorder.increment(Scope::Inbound, "req");
    recorder.increment(Scope::Inbound, "req");
    recorder.increment(Scope::Primary, "200");
    recorder.timing(Scope::Primary, "latency", Duration::from_millis(7));

    let health: HealthResponse = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health.metrics["http.in.req"], 2);
    assert_eq!(health.metrics["http.pri.200"], 1);
    assert_eq!(health.metrics["http.pri.latency.count"], 1);
    assert_eq!(health.metrics["http.pri.latency.total_ms"], 7);
}

#[tokio::test]
async fn admin_does_not_proxy_other_paths() {
    let (addr, _recorder, _shutdown) = start_admin().await;
    let resp = reqwest::get(format!("http://{addr}/foo")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn admin_stops_on_shutdown() {
    let (addr, _recorder, shutdown) = start_admin().await;
    assert!(reqwest::get(format!("http://{addr}/health")).await.is_ok());

    let _ = shutdown.send(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = reqwest::Client::new()
        .get(format!("http://{addr}/health"))
        .timeout(Duration::from_millis(500))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn proxy_drains_in_flight_request_on_shutdown() {
    let slow = Router::new().fallback(|| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        "slow-but-complete"
    });
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(backend, slow).await.unwrap();
    });

    let recorder = Arc::new(Recorder::new());
    let mut primary = target(&backend_addr.to_string());
    primary.host_rewrite = false;
    let proxy = Arc::new(MirrorProxy::new(
        primary,
        target("127.0.0.1:1"),
        Sampler::new(0.0, Arc::new(SharedRng::seeded(5))),
        recorder.clone(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serving = tokio::spawn(server::serve_proxy(listener, None, proxy, shutdown_rx));

    let in_flight = tokio::spawn(async move {
        reqwest::get(format!("http://{addr}/slow"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = shutdown_tx.send(true);

    assert_eq!(in_flight.await.unwrap(), "slow-but-complete");
    tokio::time::timeout(Duration::from_secs(3), serving)
        .await
        .expect("proxy did not stop")
        .unwrap();

    // Listener is gone.
    assert!(reqwest::get(format!("http://{addr}/")).await.is_err());
    assert_eq!(recorder.count(Scope::Primary, "200"), 1);
}
