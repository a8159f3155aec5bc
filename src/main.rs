use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};

use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use session_revocation::{
    config::Config,
    handlers,
    middleware_layer::{
        auth::{load_session, require_admin, require_auth},
        revocation::enforce_revocations,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    // Pending signals must be back in the cache before the first request.
    match state.hydration().run().await {
        Ok(report) => {
            tracing::info!("✅ Hydration completed - {} records restored", report.admitted);
        }
        Err(e) => {
            tracing::error!("❌ Failed to hydrate revocation cache: {}", e);
            return Err(e.into());
        }
    }

    let protected_routes = Router::new()
        .route("/api/me", get(handlers::session::me))
        .route_layer(from_fn(require_auth))
        .route_layer(from_fn_with_state(state.gate.clone(), enforce_revocations))
        .route_layer(from_fn_with_state(state.clone(), load_session))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route(
            "/api/admin/revocations",
            post(handlers::revocations::publish),
        )
        .route(
            "/api/admin/revocations/{subject_id}",
            get(handlers::revocations::pending),
        )
        .route_layer(from_fn_with_state(state.config.clone(), require_admin))
        .with_state(state.revocations.clone());

    let app = Router::new()
        .route("/health", get(handlers::session::health))
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new());

    let shutdown = CancellationToken::new();
    let sweep = state.sweep().spawn(config.sweep_interval, shutdown.clone());
    tracing::info!(
        "✅ Background expiry sweep started (runs every {:?})",
        config.sweep_interval
    );

    let purge = state.memory_cache.clone().map(|cache| {
        tracing::info!("✅ In-process cache purge started");
        cache.spawn_purge(config.sweep_interval.min(Duration::from_secs(300)), shutdown.clone())
    });

    let addr = config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ All systems operational");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    sweep.await.ok();
    if let Some(purge) = purge {
        purge.await.ok();
    }

    Ok(())
}

/// Resolves on Ctrl-C and cancels background jobs.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown requested");
    shutdown.cancel();
}
