mod config;
mod models;
mod routes;
mod services;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::{
    oneplay::WebSocketConnector, provider::Provider, transport::ReqwestTransport, vault::CredentialVault,
    IptvController,
};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub controller: Mutex<IptvController>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "o2iptv_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;
    let kind = config.provider_kind()?;

    tracing::info!("Starting O2 IPTV Gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Provider: {}", kind);

    // Vendor plumbing
    let transport = Arc::new(ReqwestTransport::new(&config.user_agent, config.fetch_timeout_ms)?);
    let push = Arc::new(WebSocketConnector::new());
    let provider = Provider::from_config(&config, kind, transport, push);

    let vault = CredentialVault::open(&config.session_file).await?;
    tracing::info!("Session file: {}", config.session_file);

    let controller = IptvController::new(provider, &config, vault);

    // Build application state
    let state = Arc::new(AppState {
        config,
        controller: Mutex::new(controller),
        start_time: Instant::now(),
    });

    // Login and warm caches in the background; requests queue behind it
    let startup = state.clone();
    tokio::spawn(async move {
        startup.controller.lock().await.start().await;
    });

    // Build router
    let app = Router::new()
        // Health endpoints
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/live", get(routes::health::live))
        // IPTV endpoints
        .route("/playlist", get(routes::iptv::playlist))
        .route("/epg", get(routes::iptv::epg))
        .route("/play/:channel", get(routes::iptv::play))
        .route("/channels", get(routes::iptv::channels))
        .route("/login", post(routes::iptv::login))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state.clone());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{} ({})", addr, state.config.base_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
