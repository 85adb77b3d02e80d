//! `teeproxy run`: start the mirroring proxy.
//!
//! Resolves configuration (defaults, then the optional config file, then
//! flags), sets up logging and metrics, binds the proxy listener (and the
//! admin listener if configured) and serves until SIGTERM / Ctrl+C.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::Instrument;

use crate::cli::RunArgs;
use crate::config::model::{Config, TlsConfig};
use crate::config::{self, validation};
use crate::error::TeeError;
use crate::logging;
use crate::metrics::{MetricsSink, Recorder, StatsdSink, Tee};
use crate::proxy::MirrorProxy;
use crate::server::{self, AppState};
use crate::tls;

pub async fn execute(args: RunArgs) -> Result<(), TeeError> {
    let (config, version) = resolve_config(&args).await?;

    let level = logging::effective_level(args.log_level.as_ref(), config.debug);
    logging::init(
        &level,
        logging::resolve_format(args.pretty, args.json),
        config.log_file.as_deref(),
    )?;

    let root = tracing::info_span!(
        "teeproxy",
        service = %config.identity.service_name,
        hostname = %config.identity.hostname,
    );
    serve(config, version).instrument(root).await
}

/// Built-in defaults, overlaid by the config file, overlaid by flags.
pub async fn resolve_config(args: &RunArgs) -> Result<(Config, String), TeeError> {
    let mut config = match args.config {
        Some(ref path) => config::load_file(path).await?.0,
        None => Config::default(),
    };
    args.apply(&mut config);
    validation::validate(&config).map_err(|errors| TeeError::ConfigValidation { errors })?;

    let version = config::fingerprint(&config);
    Ok((config, version))
}

/// In-memory recorder plus StatsD when a sink can be created.
pub fn build_metrics(config: &Config, recorder: Arc<Recorder>) -> Arc<dyn MetricsSink> {
    let mut sinks = vec![recorder as Arc<dyn MetricsSink>];
    match StatsdSink::connect(&config.metrics.address, &config.metrics.prefix) {
        Ok(sink) => sinks.push(Arc::new(sink)),
        Err(e) => tracing::warn!(
            address = %config.metrics.address,
            error = %e,
            "statsd sink unavailable, continuing without it"
        ),
    }
    Arc::new(Tee::new(sinks))
}

async fn serve(config: Config, version: String) -> Result<(), TeeError> {
    if validation::percent_out_of_range(config.percent) {
        tracing::warn!(
            percent = config.percent,
            "percent outside 0-100, mirroring never or always"
        );
    }

    let recorder = Arc::new(Recorder::new());
    let metrics = build_metrics(&config, Arc::clone(&recorder));
    let proxy = Arc::new(MirrorProxy::from_config(&config, metrics));

    let acceptor = match config.tls.as_ref().and_then(TlsConfig::pair) {
        Some((cert, key)) => Some(tls::create_tls_acceptor(cert, key)?),
        None => None,
    };
    let tls_enabled = acceptor.is_some();

    let listen = config.listen_addr();
    let listener = server::bind(&listen).await?;
    let admin = match config.admin_addr() {
        Some(addr) => Some((server::bind(&addr).await?, addr)),
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let admin_task = admin.map(|(admin_listener, addr)| {
        let state = Arc::new(AppState {
            proxy: Arc::clone(&proxy),
            recorder: Arc::clone(&recorder),
            config_version: version.clone(),
            identity: config.identity.clone(),
            tls: tls_enabled,
            start_time: Instant::now(),
        });
        tracing::info!(addr = %addr, "admin listener started");
        tokio::spawn(
            server::serve_admin(admin_listener, state, shutdown_rx.clone()).in_current_span(),
        )
    });

    tracing::info!(
        addr = %listen,
        primary = %config.primary.address,
        shadow = %config.shadow.address,
        percent = config.percent,
        tls = tls_enabled,
        "teeproxy started"
    );

    let proxy_task =
        tokio::spawn(server::serve_proxy(listener, acceptor, proxy, shutdown_rx).in_current_span());

    server::shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = proxy_task.await {
        tracing::error!(error = %e, "proxy listener task failed");
    }
    if let Some(task) = admin_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "admin listener stopped with error"),
            Err(e) => tracing::error!(error = %e, "admin listener task failed"),
        }
    }

    tracing::info!("teeproxy stopped");
    Ok(())
}
