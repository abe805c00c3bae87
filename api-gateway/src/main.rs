// ==============================================================================
// main.rs - PGx API Gateway Entry Point
// ==============================================================================
// Description: Axum web server for pharmacogenomic VCF analysis
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-02-09
// Version: 2.0.0
// ==============================================================================

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod handlers;
mod models;
mod state;

use state::AppState;

/// Upload cap plus multipart framing overhead
const BODY_LIMIT: usize = pgx_processor::validator::MAX_FILE_SIZE + 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing (LOG_FORMAT=json for structured output)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pgx_api_gateway=info,pgx_processor=info,pgx_audit=info,tower_http=info".into());
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    info!("Starting PGx API Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Initialize application state
    let state = AppState::from_env().context("Failed to initialize application state")?;

    let server_port: u16 = match std::env::var("PORT") {
        Ok(port) => port.parse().context("PORT must be a valid port number")?,
        Err(_) => 8099,
    };

    // Build router with all endpoints
    let app = build_router(state);

    // Bind server
    let addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    info!("API Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Run server
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/analyze", post(handlers::analyze))
        .route("/panel", get(handlers::panel))
        .route("/health", get(handlers::health_check));

    // Origins are configured via CORS_ALLOWED_ORIGINS env var (comma-separated)
    let cors_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    let allowed_origins: Vec<_> = cors_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_credentials(false)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(handlers::root))
        .nest("/api/pgx", api_routes)
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                // Request tracing
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(BODY_LIMIT)),
        )
        .with_state(state)
}
