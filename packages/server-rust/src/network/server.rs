//! HTTP server with deferred startup.
//!
//! `new()` allocates, `start()` binds the listener, and `serve()` accepts
//! connections until the shutdown token fires. Binding first lets a node
//! learn its real port (port 0) before registering it anywhere.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState, UpstreamStatus};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// How long in-flight requests may take to finish after shutdown.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpServer {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl HttpServer {
    /// Creates the server without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            config,
            listener: None,
            shutdown,
        }
    }

    /// Binds the listener and returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let local = listener.local_addr()?;
        info!(%local, "http listener bound");
        self.listener = Some(listener);
        Ok(local)
    }

    /// Assembles the probes, the given API routes, and every HTTP layer.
    pub fn build_router(
        &self,
        routes: Router,
        upstreams: Option<Arc<dyn UpstreamStatus>>,
    ) -> Router {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
            upstreams,
        };

        let probes = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(state);

        probes
            .merge(routes)
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.shutdown),
                track_in_flight,
            ))
            // The body limit is enforced by the shared layers.
            .layer(DefaultBodyLimit::disable())
            .layer(build_http_layers(&self.config))
    }

    /// Serves until the shutdown token fires, then drains in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or if the server hits a
    /// fatal I/O error.
    pub async fn serve(
        self,
        routes: Router,
        upstreams: Option<Arc<dyn UpstreamStatus>>,
    ) -> anyhow::Result<()> {
        let router = self.build_router(routes, upstreams);
        let Self { listener, shutdown, .. } = self;
        let listener =
            listener.ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;

        shutdown.set_ready();

        info!(local = %listener.local_addr()?, "serving HTTP");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.token().cancelled_owned())
            .await?;

        drain(&shutdown).await;
        Ok(())
    }
}

async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownController>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = shutdown.in_flight_guard();
    next.run(request).await
}

/// Waits up to [`DRAIN_TIMEOUT`] for in-flight calls, then reports.
pub async fn drain(shutdown: &ShutdownController) {
    shutdown.trigger_shutdown();
    let in_flight = shutdown.in_flight_count();
    if in_flight > 0 {
        info!(in_flight, "draining in-flight requests");
    }

    if shutdown.wait_for_drain(DRAIN_TIMEOUT).await {
        info!("all in-flight requests drained");
    } else {
        warn!(
            remaining = shutdown.in_flight_count(),
            "drain timeout expired with in-flight requests remaining"
        );
    }
}
