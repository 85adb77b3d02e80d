//! End-to-end mirroring through a real listener with fake backends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use teeproxy::metrics::{Recorder, Scope};
use teeproxy::proxy::forward::BackendTarget;
use teeproxy::proxy::sampler::{Sampler, SharedRng};
use teeproxy::proxy::MirrorProxy;
use teeproxy::server;

fn target(addr: impl ToString) -> BackendTarget {
    BackendTarget {
        address: addr.to_string(),
        connect_timeout: Duration::from_secs(1),
        host_rewrite: false,
        exchange_timeout: None,
    }
}

async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn spawn_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Backend that answers `status` and forwards each request's body and
/// Host header to the returned channel.
async fn recording_backend(
    status: StatusCode,
    reply: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<(Bytes, String)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new().fallback(move |headers: HeaderMap, body: Bytes| {
        let tx = tx.clone();
        async move {
            let host = headers
                .get("host")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let _ = tx.send((body, host));
            (status, reply)
        }
    });
    (spawn_backend(router).await, rx)
}

struct Harness {
    addr: SocketAddr,
    recorder: Arc<Recorder>,
    _shutdown: watch::Sender<bool>,
}

async fn start_proxy(primary: BackendTarget, shadow: BackendTarget, percent: f64) -> Harness {
    let recorder = Arc::new(Recorder::new());
    let proxy = Arc::new(MirrorProxy::new(
        primary,
        shadow,
        Sampler::new(percent, Arc::new(SharedRng::seeded(11))),
        recorder.clone(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server::serve_proxy(listener, None, proxy, shutdown_rx));

    Harness {
        addr,
        recorder,
        _shutdown: shutdown_tx,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn mirrors_body_to_both_and_answers_from_primary() {
    let (primary, mut primary_rx) = recording_backend(StatusCode::OK, "hello-A").await;
    let (shadow, mut shadow_rx) = recording_backend(StatusCode::CREATED, "hello-B").await;
    let h = start_proxy(target(primary), target(shadow), 100.0).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/foo", h.addr))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hello-A");

    let (primary_body, _) = primary_rx.recv().await.unwrap();
    assert_eq!(&primary_body[..], b"hello");

    let (shadow_body, _) = tokio::time::timeout(Duration::from_secs(3), shadow_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&shadow_body[..], b"hello");

    let recorder = h.recorder.clone();
    assert!(eventually(|| recorder.count(Scope::Shadow, "201") == 1).await);
    assert_eq!(h.recorder.count(Scope::Inbound, "req"), 1);
    assert_eq!(h.recorder.count(Scope::Primary, "200"), 1);
    assert_eq!(h.recorder.timings(Scope::Primary, "latency"), 1);
    assert!(eventually(|| recorder.timings(Scope::Shadow, "latency") == 1).await);
}

#[tokio::test]
async fn unreachable_primary_returns_503() {
    let h = start_proxy(
        target(unused_addr().await),
        target(unused_addr().await),
        100.0,
    )
    .await;

    let resp = reqwest::get(format!("http://{}/", h.addr)).await.unwrap();
    assert_eq!(resp.status(), 503);
    assert!(resp.bytes().await.unwrap().is_empty());
    assert_eq!(h.recorder.count(Scope::Primary, "503"), 1);
    assert_eq!(h.recorder.timings(Scope::Primary, "latency"), 0);
}

#[tokio::test]
async fn shadow_failure_is_invisible_to_client() {
    let (primary, _rx) = recording_backend(StatusCode::OK, "ok").await;
    let h = start_proxy(target(primary), target(unused_addr().await), 100.0).await;

    let resp = reqwest::get(format!("http://{}/", h.addr)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    let recorder = h.recorder.clone();
    assert!(eventually(|| recorder.count(Scope::Shadow, "503") == 1).await);
}

#[tokio::test]
async fn hanging_shadow_does_not_delay_client() {
    let (primary, _rx) = recording_backend(StatusCode::OK, "fast").await;

    // Accepts and reads, never answers.
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let shadow = silent.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = silent.accept().await {
            held.push(stream);
        }
    });

    let h = start_proxy(target(primary), target(shadow), 100.0).await;

    let started = Instant::now();
    let resp = reqwest::get(format!("http://{}/", h.addr)).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "fast");
    assert!(started.elapsed() < Duration::from_millis(800));
}

#[tokio::test]
async fn host_rewrite_applies_per_backend() {
    let (primary, mut primary_rx) = recording_backend(StatusCode::OK, "a").await;
    let (shadow, mut shadow_rx) = recording_backend(StatusCode::OK, "b").await;

    let mut primary_target = target(primary);
    primary_target.host_rewrite = true;
    let h = start_proxy(primary_target, target(shadow), 100.0).await;

    reqwest::get(format!("http://{}/", h.addr)).await.unwrap();

    let (_, primary_host) = primary_rx.recv().await.unwrap();
    let (_, shadow_host) = tokio::time::timeout(Duration::from_secs(3), shadow_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(primary_host, primary.to_string());
    assert_eq!(shadow_host, h.addr.to_string());
}

#[tokio::test]
async fn zero_percent_never_mirrors() {
    let (primary, _primary_rx) = recording_backend(StatusCode::OK, "a").await;
    let (shadow, mut shadow_rx) = recording_backend(StatusCode::OK, "b").await;
    let h = start_proxy(target(primary), target(shadow), 0.0).await;

    let client = reqwest::Client::new();
    for _ in 0..5 {
        let resp = client
            .post(format!("http://{}/", h.addr))
            .body("payload")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(shadow_rx.try_recv().is_err());
    assert_eq!(h.recorder.count(Scope::Inbound, "req"), 5);
    assert_eq!(h.recorder.count(Scope::Primary, "200"), 5);
    assert!(!h.recorder.snapshot().keys().any(|k| k.starts_with("http.alt")));
}

#[tokio::test]
async fn truncated_primary_response_drops_client_connection() {
    let broken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let primary = broken.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = broken.accept().await {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort")
                .await;
        }
    });

    let h = start_proxy(target(primary), target(unused_addr().await), 0.0).await;

    let result = reqwest::get(format!("http://{}/", h.addr)).await;
    assert!(result.is_err());
    assert_eq!(h.recorder.count(Scope::Primary, "failed.read"), 1);
    assert_eq!(h.recorder.count(Scope::Primary, "200"), 0);
}

#[tokio::test]
async fn status_and_headers_are_relayed() {
    let router = Router::new().fallback(|headers: HeaderMap| async move {
        let trace = headers
            .get("x-trace")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (
            StatusCode::IM_A_TEAPOT,
            [("x-served-by", "primary"), ("x-echo-trace", "seen")],
            trace,
        )
    });
    let primary = spawn_backend(router).await;
    let h = start_proxy(target(primary), target(unused_addr().await), 0.0).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/tea?cup=1", h.addr))
        .header("x-trace", "abc123")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 418);
    assert_eq!(resp.headers()["x-served-by"], "primary");
    assert_eq!(resp.headers()["x-echo-trace"], "seen");
    assert_eq!(resp.text().await.unwrap(), "abc123");
    assert_eq!(h.recorder.count(Scope::Primary, "418"), 1);
}
