use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use gatehouse_api::handlers::{self, AppState, AppStateInner};
use gatehouse_api::limit::{self, FixedWindow};
use gatehouse_bot::client::BotClient;
use gatehouse_bot::dispatch::{self, BotConfig};
use gatehouse_bot::sweep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let bot_token = std::env::var("GATEHOUSE_BOT_TOKEN").unwrap_or_default();
    if bot_token.is_empty() {
        eprintln!("FATAL: GATEHOUSE_BOT_TOKEN is not set.");
        eprintln!("       Put the bot token in your .env file and restart.");
        std::process::exit(1);
    }
    let bot_username = require_env("GATEHOUSE_BOT_USERNAME")?;
    let channel = require_env("GATEHOUSE_CHANNEL")?;
    let db_path = std::env::var("GATEHOUSE_DB_PATH").unwrap_or_else(|_| "gatehouse.db".into());
    let host = std::env::var("GATEHOUSE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("GATEHOUSE_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()?;
    let recheck_interval_secs: u64 = std::env::var("GATEHOUSE_RECHECK_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(604_800); // 7 days

    // Init database
    let db = Arc::new(gatehouse_db::Database::open(&PathBuf::from(&db_path))?);

    // Bot layer: update dispatch plus the periodic recheck sweep
    let bot = BotClient::new(&bot_token)?;
    let bot_config = BotConfig { channel };
    tokio::spawn(dispatch::run_update_loop(
        bot.clone(),
        db.clone(),
        bot_config.clone(),
    ));
    tokio::spawn(sweep::run_recheck_loop(
        db.clone(),
        bot,
        bot_config,
        recheck_interval_secs,
    ));

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        bot_username,
        register_limiter: FixedWindow::new(5, Duration::from_secs(60)),
        global_limiter: FixedWindow::new(50, Duration::from_secs(3600)),
    });

    // Register carries its own tighter throttle on top of the global one;
    // /health sits outside both
    let register_route = Router::new()
        .route("/api/register", post(handlers::register))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limit::throttle_register,
        ));

    let app = Router::new()
        .merge(register_route)
        .route("/api/check_access", get(handlers::check_access))
        .route("/api/subscribe", post(handlers::subscribe))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limit::throttle_global,
        ))
        .route("/health", get(handlers::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Gatehouse listening on {}", addr);
    info!(
        "Recheck interval: {} seconds ({} days)",
        recheck_interval_secs,
        recheck_interval_secs / 86_400
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
