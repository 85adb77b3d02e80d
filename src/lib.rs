//! teeproxy is an HTTP traffic-mirroring reverse proxy.
//!
//! Every inbound request is forwarded to a primary backend, whose response
//! goes back to the client, and (for a configurable share of requests) a
//! copy is sent to a shadow backend whose response is discarded. The shadow
//! path never delays or alters what the client sees.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate, health).
//! - [`config`] -- Config file loading, flag overlay and validation.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`health`] -- `GET /health` handler for the admin listener.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`metrics`] -- StatsD and in-memory counters behind one sink trait.
//! - [`proxy`] -- Sampling, body duplication, and primary / shadow forwarding.
//! - [`server`] -- Listeners, per-connection serving, and graceful shutdown.
//! - [`tls`] -- Inbound TLS termination with rustls.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file formats |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod server;
pub mod tls;
