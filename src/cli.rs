//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, validate, health), and their associated argument
//! structs. Every `run` flag has an environment variable equivalent for
//! container deployments. `run` flags are all optional: a flag that was
//! not given leaves the config file (or built-in default) value alone.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::model::{Config, TlsConfig};

#[derive(Parser)]
#[command(
    name = "teeproxy",
    version,
    about = "HTTP traffic-mirroring reverse proxy",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        teeproxy run -a localhost:8080 -b localhost:8081    Mirror everything\n  \
        teeproxy run -c teeproxy.yaml                       Start from a config file\n  \
        teeproxy validate teeproxy.yaml                     Check a config file"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the mirroring proxy
    Run(Box<RunArgs>),

    /// Validate a config file without starting
    Validate(ValidateArgs),

    /// Check health of a running instance
    Health(HealthArgs),
}

#[derive(Args, Default)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        teeproxy run -l :8888 -a prod:8080 -b canary:8080           Mirror all traffic\n  \
        teeproxy run -a prod:8080 -b canary:8080 -p 10              Mirror 10%\n  \
        teeproxy run -c teeproxy.yaml --debug --pretty              Local dev mode\n  \
        teeproxy run --cert-file cert.pem --key-file key.pem        Terminate TLS")]
pub struct RunArgs {
    /// Config file path (.yaml, .json, .toml)
    #[arg(short, long, env = "TEEPROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address (`:port` listens on all interfaces)
    #[arg(short, long, env = "TEEPROXY_LISTEN")]
    pub listen: Option<String>,

    /// Primary backend `host:port`; its responses go back to clients
    #[arg(short = 'a', long, env = "TEEPROXY_PRIMARY")]
    pub primary: Option<String>,

    /// Shadow backend `host:port`; its responses are discarded
    #[arg(short = 'b', long, env = "TEEPROXY_SHADOW")]
    pub shadow: Option<String>,

    /// Share of requests mirrored to the shadow backend (0-100)
    #[arg(short, long, env = "TEEPROXY_PERCENT")]
    pub percent: Option<f64>,

    /// Debug logging, including shadow-path failures
    #[arg(long, env = "TEEPROXY_DEBUG")]
    pub debug: bool,

    // -- Backends --
    /// Primary connect timeout in seconds
    #[arg(long, env = "TEEPROXY_PRIMARY_TIMEOUT", help_heading = "Backends")]
    pub primary_timeout: Option<u64>,

    /// Shadow connect timeout in seconds
    #[arg(long, env = "TEEPROXY_SHADOW_TIMEOUT", help_heading = "Backends")]
    pub shadow_timeout: Option<u64>,

    /// Set the Host header to the primary address
    #[arg(long, env = "TEEPROXY_PRIMARY_REWRITE", help_heading = "Backends")]
    pub primary_rewrite: bool,

    /// Set the Host header to the shadow address
    #[arg(long, env = "TEEPROXY_SHADOW_REWRITE", help_heading = "Backends")]
    pub shadow_rewrite: bool,

    /// Bound on send + receive with the primary, in seconds
    #[arg(
        long,
        env = "TEEPROXY_PRIMARY_EXCHANGE_TIMEOUT",
        help_heading = "Backends"
    )]
    pub primary_exchange_timeout: Option<u64>,

    /// Bound on send + receive with the shadow, in seconds
    #[arg(
        long,
        env = "TEEPROXY_SHADOW_EXCHANGE_TIMEOUT",
        help_heading = "Backends"
    )]
    pub shadow_exchange_timeout: Option<u64>,

    // -- Listener --
    /// PEM certificate chain; enables TLS on the listener
    #[arg(long, env = "TEEPROXY_CERT_FILE", help_heading = "Listener")]
    pub cert_file: Option<PathBuf>,

    /// PEM private key for --cert-file
    #[arg(long, env = "TEEPROXY_KEY_FILE", help_heading = "Listener")]
    pub key_file: Option<PathBuf>,

    /// Address for the admin `/health` listener
    #[arg(long, env = "TEEPROXY_ADMIN_LISTEN", help_heading = "Listener")]
    pub admin_listen: Option<String>,

    /// Max request body size in bytes
    #[arg(long, env = "TEEPROXY_MAX_BODY", help_heading = "Listener")]
    pub max_body: Option<usize>,

    /// Seed for the mirroring decision (reproducible sampling)
    #[arg(long, env = "TEEPROXY_SEED", help_heading = "Listener")]
    pub seed: Option<u64>,

    // -- Observability --
    /// StatsD `host:port`
    #[arg(long, env = "TEEPROXY_STATSD_ADDRESS", help_heading = "Observability")]
    pub statsd_address: Option<String>,

    /// Prefix for StatsD metric names
    #[arg(long, env = "TEEPROXY_STATSD_PREFIX", help_heading = "Observability")]
    pub statsd_prefix: Option<String>,

    /// Service name attached to every log line
    #[arg(long, env = "TEEPROXY_SERVICE_NAME", help_heading = "Observability")]
    pub service_name: Option<String>,

    /// Hostname attached to every log line
    #[arg(long, env = "TEEPROXY_HOSTNAME", help_heading = "Observability")]
    pub hostname: Option<String>,

    /// Append JSON log lines to this file instead of stdout
    #[arg(long, env = "TEEPROXY_LOG_FILE", help_heading = "Observability")]
    pub log_file: Option<PathBuf>,

    // -- Logging --
    /// Log level (defaults to info, or debug with --debug)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,
}

impl RunArgs {
    /// Overlay every flag that was given onto `config`.
    pub fn apply(&self, config: &mut Config) {
        fn set<T: Clone>(slot: &mut T, value: Option<&T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut config.listen, self.listen.as_ref());
        set(&mut config.primary.address, self.primary.as_ref());
        set(&mut config.shadow.address, self.shadow.as_ref());
        set(&mut config.percent, self.percent.as_ref());
        set(&mut config.primary.timeout, self.primary_timeout.as_ref());
        set(&mut config.shadow.timeout, self.shadow_timeout.as_ref());
        set(&mut config.max_body, self.max_body.as_ref());
        set(&mut config.metrics.address, self.statsd_address.as_ref());
        set(&mut config.metrics.prefix, self.statsd_prefix.as_ref());
        set(&mut config.identity.service_name, self.service_name.as_ref());
        set(&mut config.identity.hostname, self.hostname.as_ref());

        if self.primary_exchange_timeout.is_some() {
            config.primary.exchange_timeout = self.primary_exchange_timeout;
        }
        if self.shadow_exchange_timeout.is_some() {
            config.shadow.exchange_timeout = self.shadow_exchange_timeout;
        }
        if self.admin_listen.is_some() {
            config.admin_listen.clone_from(&self.admin_listen);
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.log_file.is_some() {
            config.log_file.clone_from(&self.log_file);
        }

        config.debug |= self.debug;
        config.primary.host_rewrite |= self.primary_rewrite;
        config.shadow.host_rewrite |= self.shadow_rewrite;

        if self.cert_file.is_some() || self.key_file.is_some() {
            let tls = config.tls.get_or_insert_with(TlsConfig::default);
            if self.cert_file.is_some() {
                tls.cert.clone_from(&self.cert_file);
            }
            if self.key_file.is_some() {
                tls.key.clone_from(&self.key_file);
            }
        }
    }
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Config file to validate
    #[arg(default_value = "teeproxy.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Args)]
pub struct HealthArgs {
    /// Admin URL of the running instance
    #[arg(default_value = "http://localhost:8889")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}
