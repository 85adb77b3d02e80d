//! `GET /health` on the admin listener.
//!
//! Returns a [`HealthResponse`] JSON payload with the server version,
//! uptime, identity tags, the active forwarding policy and every counter
//! the in-memory [`Recorder`](crate::metrics::Recorder) has seen.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::proxy::forward::BackendTarget;
use crate::server::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub commit: String,
    pub uptime_seconds: u64,
    pub service_name: String,
    pub hostname: String,
    pub config: ConfigHealth,
    pub metrics: BTreeMap<String, u64>,
}

#[derive(Serialize, Deserialize)]
pub struct ConfigHealth {
    pub version: String,
    pub tls: bool,
    pub percent: f64,
    pub primary: BackendHealth,
    pub shadow: BackendHealth,
}

#[derive(Serialize, Deserialize)]
pub struct BackendHealth {
    pub address: String,
    pub connect_timeout_seconds: u64,
    pub host_rewrite: bool,
}

impl From<&BackendTarget> for BackendHealth {
    fn from(target: &BackendTarget) -> Self {
        Self {
            address: target.address.clone(),
            connect_timeout_seconds: target.connect_timeout.as_secs(),
            host_rewrite: target.host_rewrite,
        }
    }
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let version = state
        .config_version
        .get(..8)
        .unwrap_or(&state.config_version)
        .to_string();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("TEEPROXY_GIT_SHORT").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        service_name: state.identity.service_name.clone(),
        hostname: state.identity.hostname.clone(),
        config: ConfigHealth {
            version,
            tls: state.tls,
            percent: state.proxy.percent(),
            primary: state.proxy.primary().into(),
            shadow: state.proxy.shadow().into(),
        },
        metrics: state.recorder.snapshot(),
    })
}
