//! Serde data structures for the teeproxy configuration file.
//!
//! Contains [`Config`] (the root), [`Backend`], [`TlsConfig`],
//! [`MetricsConfig`] and [`Identity`]. Parsing is strict
//! (`deny_unknown_fields`) and every field has a default, so an empty file
//! is a valid config. A backend section fills its missing fields from that
//! backend's own defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::proxy::forward::BackendTarget;

fn default_listen() -> String {
    ":8888".to_string()
}

const fn default_percent() -> f64 {
    100.0
}

const fn default_max_body() -> usize {
    10 * 1024 * 1024
}

fn default_primary() -> Backend {
    Backend {
        address: "localhost:8080".into(),
        timeout: 3,
        host_rewrite: false,
        exchange_timeout: None,
    }
}

fn default_shadow() -> Backend {
    Backend {
        address: "localhost:8081".into(),
        timeout: 1,
        host_rewrite: false,
        exchange_timeout: None,
    }
}

fn primary_backend<'de, D: Deserializer<'de>>(d: D) -> Result<Backend, D::Error> {
    BackendFields::deserialize(d).map(|fields| fields.over(default_primary()))
}

fn shadow_backend<'de, D: Deserializer<'de>>(d: D) -> Result<Backend, D::Error> {
    BackendFields::deserialize(d).map(|fields| fields.over(default_shadow()))
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_primary", deserialize_with = "primary_backend")]
    pub primary: Backend,

    #[serde(default = "default_shadow", deserialize_with = "shadow_backend")]
    pub shadow: Backend,

    /// Share of requests mirrored to the shadow backend, 0-100.
    #[serde(default = "default_percent")]
    pub percent: f64,

    #[serde(default, skip_serializing_if = "is_false")]
    pub debug: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub identity: Identity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_listen: Option<String>,

    #[serde(default = "default_max_body")]
    pub max_body: usize,

    /// Fixed seed for the sampler's random source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            primary: default_primary(),
            shadow: default_shadow(),
            percent: default_percent(),
            debug: false,
            tls: None,
            metrics: MetricsConfig::default(),
            identity: Identity::default(),
            admin_listen: None,
            max_body: default_max_body(),
            seed: None,
            log_file: None,
        }
    }
}

impl Config {
    /// Listen address with a bare `:port` expanded to all interfaces.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        normalize_listen(&self.listen)
    }

    #[must_use]
    pub fn admin_addr(&self) -> Option<String> {
        self.admin_listen.as_deref().map(normalize_listen)
    }
}

#[must_use]
pub fn normalize_listen(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Missing fields take the defaults of the backend being configured, so the
/// primary and shadow sections fall back to different timeouts.
#[derive(Debug, Clone, Serialize)]
pub struct Backend {
    /// `host:port`, always dialed in plaintext.
    pub address: String,

    /// Connect timeout in seconds.
    pub timeout: u64,

    #[serde(skip_serializing_if = "is_false")]
    pub host_rewrite: bool,

    /// Bound on send + receive after the connection is up, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_timeout: Option<u64>,
}

/// A backend section as written in the file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BackendFields {
    address: Option<String>,
    timeout: Option<u64>,
    host_rewrite: Option<bool>,
    exchange_timeout: Option<u64>,
}

impl BackendFields {
    fn over(self, base: Backend) -> Backend {
        Backend {
            address: self.address.unwrap_or(base.address),
            timeout: self.timeout.unwrap_or(base.timeout),
            host_rewrite: self.host_rewrite.unwrap_or(base.host_rewrite),
            exchange_timeout: self.exchange_timeout.or(base.exchange_timeout),
        }
    }
}

impl Backend {
    #[must_use]
    pub fn target(&self) -> BackendTarget {
        BackendTarget {
            address: self.address.clone(),
            connect_timeout: Duration::from_secs(self.timeout),
            host_rewrite: self.host_rewrite,
            exchange_timeout: self.exchange_timeout.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
}

impl TlsConfig {
    /// Both halves, if the listener should terminate TLS.
    #[must_use]
    pub fn pair(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.cert.as_ref().zip(self.key.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub address: String,
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8125".into(),
            prefix: "teeproxy".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Identity {
    pub service_name: String,
    pub hostname: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            hostname: "localhost".into(),
        }
    }
}
