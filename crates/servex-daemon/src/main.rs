//! servex-daemon entry point.
//!
//! Thin on purpose: tracing, config and secrets, shared state, middleware,
//! then the HTTP server. Handlers live under `routes/`; shared state in
//! `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{header, HeaderName, HeaderValue, Method};
use servex_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

const ENV_ADDR: &str = "SERVEX_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = servex_config::load_from_env()?;
    let cfg = loaded.service()?;
    let secrets = servex_config::secrets::resolve_secrets(&cfg)?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let store = servex_db::connect_from_config(&cfg, secrets.database_url.as_deref()).await?;
    let gateway = servex_payments::build_gateway(&cfg.payments, &secrets)?;
    info!(store = store.backend(), gateway = gateway.name(), "backends ready");

    let addr = match bind_addr_from_env() {
        Some(addr) => addr,
        None => cfg
            .server
            .addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid server.addr '{}'", cfg.server.addr))?,
    };
    let cors = cors_layer(cfg.server.frontend_url.as_deref());

    let shared = Arc::new(state::AppState::new(
        cfg,
        store,
        gateway,
        &secrets.jwt_secret,
    ));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_cleanup(Arc::clone(&shared));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ));

    info!("servex-daemon listening on http://{}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server crashed")?;

    info!("servex-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(ENV_ADDR).ok()?.parse().ok()
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// CORS: localhost dev origins plus the configured frontend.
fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let local_origins = [
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = local_origins
        .iter()
        .copied()
        .chain(frontend_url)
        .filter_map(|o| HeaderValue::from_str(o.trim_end_matches('/')).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}
