use crate::config::Config;
use crate::streaming::{self, Relay};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Manifest/segment relay, owning the segment cache
    pub relay: Arc<Relay>,
}

impl AppContext {
    /// Build the relay described by `config`.
    pub fn new(config: Config) -> Result<Self> {
        let relay = Relay::from_config(&config).context("Failed to build upstream client")?;
        Ok(Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
        })
    }

    /// `max-age` advertised on segment responses.
    pub fn cache_max_age(&self) -> u64 {
        self.config.cache.ttl_secs
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    // Browser-based players fetch playlists and segments cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::RANGE, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/stream", streaming::stream_router())
        .nest("/segment", streaming::segment_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server and run until a shutdown signal arrives.
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let ctx = AppContext::new(config)?;

    let sweep_handle = match ctx.config.cache.sweep_interval_secs {
        0 => None,
        secs => Some(ctx.relay.start_sweep(Duration::from_secs(secs))),
    };

    tracing::info!(
        ttl_secs = ctx.config.cache.ttl_secs,
        eager_expiry = ctx.config.cache.eager_expiry,
        coalesce = ctx.config.cache.coalesce,
        proxied = ctx.config.upstream.proxy().is_some(),
        "Segment cache ready"
    );

    let app = create_router(ctx.clone());

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweep_handle {
        handle.abort();
    }
    ctx.relay.cache().shutdown();

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
