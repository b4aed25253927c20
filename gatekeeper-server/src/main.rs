use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper_server::admission::{Admission, AdmissionContext, SqliteRepository, SystemClock};
use gatekeeper_server::config::Config;
use gatekeeper_server::gateway::TelegramGateway;
use gatekeeper_server::status::status_handler;
use gatekeeper_server::webhook::webhook_router;
use gatekeeper_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "gatekeeper",
        "version": gatekeeper_server::get_bot_version(),
    })))
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = %gatekeeper_server::get_bot_version(), "Starting gatekeeper");

    let config = Config::from_env().context("Failed to load configuration from environment variables")?;

    let db_path = config.state_dir.join("gatekeeper-state.db");
    info!("Using state database: {}", db_path.display());
    let repository = Arc::new(
        SqliteRepository::new(&db_path).context("Failed to initialize SQLite database")?,
    );

    let gateway = Arc::new(TelegramGateway::new(
        config.telegram_api_url.clone(),
        config.telegram_bot_token.clone(),
    ));

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(AdmissionContext {
        repository: repository.clone(),
        gateway,
        clock: Arc::new(SystemClock),
        config: config.admission.clone(),
        shutdown: shutdown.clone(),
    });
    let admission = Admission::new(ctx);

    info!(
        chats = ?config.guarded_chats,
        timeout_secs = config.admission.challenge_timeout.num_seconds(),
        max_retries = config.admission.max_retries,
        "Guarding chats"
    );

    let tasks = TaskTracker::new();
    let app_state = Arc::new(AppState {
        admission: admission.clone(),
        repository,
        webhook_secret: config.telegram_webhook_secret.clone(),
        status_auth_token: config.status_auth_token.clone(),
        guarded_chats: config.guarded_chats.clone(),
        tasks: tasks.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    // Start the sweep; it stops when the token is cancelled
    let sweeper = admission.sweeper.clone();
    let sweep_task = tokio::spawn(async move {
        sweeper.run().await;
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("Server listening on port {}", config.port);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {},
                _ = server_shutdown.cancelled() => {},
            }
            info!("Shutdown requested");
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    // In-flight resolutions get the executor's grace window to finish
    shutdown.cancel();
    tasks.close();
    let (sweep_result, ()) = tokio::join!(sweep_task, tasks.wait());
    if let Err(e) = sweep_result {
        tracing::error!("Sweep task ended abnormally: {}", e);
    }

    info!("Gatekeeper stopped");
    Ok(())
}
