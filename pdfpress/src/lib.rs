//! # pdfpress: a small web front-end for shrinking PDFs
//!
//! `pdfpress` serves an upload form, compresses each uploaded PDF with an external tool
//! (Ghostscript by default), shows the before/after sizes, and lets the user download the result
//! exactly once.
//!
//! ## Request flow
//!
//! A `POST /compress` streams the uploaded file into `upload_dir` under a collision-free name,
//! hands it to the configured [`CompressionBackend`](compression::CompressionBackend) together
//! with the chosen [`CompressionLevel`](compression::CompressionLevel), and renders a result page
//! linking to `GET /download/{filename}`. The original upload is removed as soon as compression
//! has finished, successfully or not. The compressed file is removed once it has been fully sent.
//!
//! Validation problems (no file, wrong extension, unknown download) send the user back to the form
//! with a one-shot [flash message](flash). Tool failures and other server-side problems render the
//! error page; see [`errors`] for the full mapping.
//!
//! ## Housekeeping
//!
//! Files left behind by abandoned downloads or crashes are removed by an age-based [`cleanup`]
//! sweep, once at startup and optionally on an interval.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use pdfpress::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = pdfpress::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     pdfpress::telemetry::init_telemetry(config.debug, config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod cleanup;
pub mod compression;
pub mod config;
pub mod errors;
pub mod flash;
mod limits;
mod static_assets;
pub mod storage;
pub mod telemetry;
#[cfg(test)]
mod test_utils;
mod views;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, warn};

use crate::api::handlers::{compress, download, pages, static_assets as assets};
use crate::compression::CompressionBackend;
pub use crate::config::Config;
use crate::limits::Limiters;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .backend(compression::create_backend(&config))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub backend: Arc<dyn CompressionBackend>,
    #[builder(default)]
    pub limiters: Limiters,
}

/// Build the application router.
///
/// Only `/compress` accepts a large body; its limit is `max_upload_size`.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX);
    let enable_metrics = state.config.enable_metrics;

    let mut router = Router::new()
        .route("/", get(pages::index))
        .route(
            "/compress",
            post(compress::compress).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/download/{*filename}", get(download::download))
        .route("/static/{*path}", get(assets::serve_embedded_asset))
        .route("/healthz", get(|| async { "OK" }))
        .fallback(pages::not_found)
        .with_state(state);

    if enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route(
                "/internal/metrics",
                get(move || {
                    let metric_handle = metric_handle.clone();
                    async move { metric_handle.render() }
                }),
            )
            .layer(prometheus_layer);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Background tasks and their lifecycle.
///
/// Dropping this without calling [`shutdown`](BackgroundServices::shutdown) still cancels the
/// tasks, through the drop guard.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Run the startup sweep and start the periodic one, as configured.
async fn setup_background_services(config: &Config, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();
    let directories = vec![config.upload_dir.clone(), config.compressed_dir.clone()];

    if config.cleanup.on_startup {
        let report = cleanup::sweep_all(&directories, config.cleanup.retention).await;
        info!(
            removed = report.removed,
            failed = report.failed,
            "Startup cleanup finished"
        );
    }

    if let Some(interval) = config.cleanup.interval {
        background_tasks.push(cleanup::spawn_periodic_sweep(
            directories,
            config.cleanup.retention,
            interval,
            shutdown_token.clone(),
        ));
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// The assembled server: router plus background services.
///
/// 1. **Startup**: storage directories are created, the backend is checked, and stale files swept
/// 2. **Serving**: [`serve`](Application::serve) runs until the shutdown future resolves
/// 3. **Shutdown**: background tasks are stopped and telemetry flushed
pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application using the backend named by the configuration.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let backend = compression::create_backend(&config);
        Self::new_with_backend(config, backend).await
    }

    /// Create a new application with an explicit compression backend.
    pub async fn new_with_backend(config: Config, backend: Arc<dyn CompressionBackend>) -> anyhow::Result<Self> {
        debug!("Starting pdfpress with configuration: {:#?}", config);

        for directory in [&config.upload_dir, &config.compressed_dir] {
            tokio::fs::create_dir_all(directory)
                .await
                .with_context(|| format!("Failed to create storage directory {}", directory.display()))?;
        }

        // A missing tool is not fatal; the form still works and each compression reports it
        if let Err(e) = backend.check().await {
            warn!(backend = backend.name(), error = %e, "Compression backend is not usable");
        }

        let bg_services = setup_background_services(&config, CancellationToken::new()).await;

        let state = AppState::builder()
            .config(config.clone())
            .backend(backend)
            .limiters(Limiters::new(&config.limits))
            .build();

        Ok(Self {
            router: build_router(state),
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind {bind_addr}"))?;
        info!(
            "pdfpress listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        self.bg_services.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
