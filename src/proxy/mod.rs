//! Core request mirroring.
//!
//! [`MirrorProxy::handle`] is called once per inbound request. It asks the
//! [`Sampler`](sampler::Sampler) whether to mirror, reads the body
//! ([`envelope`]), hands the shadow copy to a detached job
//! ([`shadow`], [`supervise`]) and then forwards the primary copy on the
//! calling task ([`primary`]). The client response depends on the primary
//! backend alone; nothing waits for the shadow.

pub mod envelope;
pub mod forward;
pub mod primary;
pub mod sampler;
pub mod shadow;
pub mod supervise;

use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Body;
use tracing::Instrument;

use crate::config::model::Config;
use crate::error::{DuplicationError, ForwardError};
use crate::metrics::{MetricsSink, Scope};
use forward::BackendTarget;
use sampler::{RandomSource, Sampler, SharedRng};

pub struct MirrorProxy {
    primary: BackendTarget,
    shadow: Arc<BackendTarget>,
    sampler: Sampler,
    metrics: Arc<dyn MetricsSink>,
    debug: bool,
    max_body: usize,
}

impl MirrorProxy {
    #[must_use]
    pub fn new(
        primary: BackendTarget,
        shadow: BackendTarget,
        sampler: Sampler,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            primary,
            shadow: Arc::new(shadow),
            sampler,
            metrics,
            debug: false,
            max_body: 10 * 1024 * 1024,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config, metrics: Arc<dyn MetricsSink>) -> Self {
        let source: Arc<dyn RandomSource> = match config.seed {
            Some(seed) => Arc::new(SharedRng::seeded(seed)),
            None => Arc::new(SharedRng::from_entropy()),
        };
        Self::new(
            config.primary.target(),
            config.shadow.target(),
            Sampler::new(config.percent, source),
            metrics,
        )
        .with_debug(config.debug)
        .with_max_body(config.max_body)
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub const fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Handle one inbound request. `Err` means the primary backend failed
    /// after connecting; the caller must drop the client connection
    /// without writing a response.
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, ForwardError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.metrics.increment(Scope::Inbound, "req");

        let span = tracing::info_span!(
            "request",
            request_id = %uuid::Uuid::new_v4(),
            method = %req.method(),
            uri = %req.uri(),
        );

        async move {
            let primary = if self.sampler.should_mirror() {
                let (primary, mirrored) = match envelope::duplicate(req, self.max_body).await {
                    Ok(pair) => pair,
                    Err(e) => return Ok(self.reject(&e)),
                };
                supervise::spawn_detached(
                    "shadow",
                    self.debug,
                    shadow::forward_shadow(
                        mirrored,
                        Arc::clone(&self.shadow),
                        Arc::clone(&self.metrics),
                        self.debug,
                    )
                    .in_current_span(),
                );
                primary
            } else {
                match envelope::buffer(req, self.max_body).await {
                    Ok(envelope) => envelope,
                    Err(e) => return Ok(self.reject(&e)),
                }
            };

            primary::forward(primary, &self.primary, self.metrics.as_ref()).await
        }
        .instrument(span)
        .await
    }

    /// Neither backend sees a request whose body could not be read whole.
    fn reject(&self, e: &DuplicationError) -> Response<Full<Bytes>> {
        self.metrics.increment(Scope::Inbound, "rejected");
        let status = match e {
            DuplicationError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DuplicationError::Body { .. } => StatusCode::BAD_REQUEST,
        };
        tracing::warn!(error = %e, status = status.as_u16(), "rejecting request");
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }

    #[must_use]
    pub fn primary(&self) -> &BackendTarget {
        &self.primary
    }

    #[must_use]
    pub fn shadow(&self) -> &BackendTarget {
        &self.shadow
    }

    #[must_use]
    pub const fn percent(&self) -> f64 {
        self.sampler.percent()
    }
}
