use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod texts;

use services::{
    polling_service::PollingService,
    storage_service::MongoUserStore,
    telegram_service::TelegramClient,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- Parse config + ensure-indexes flag ---
    let (cfg, ensure_indexes) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting support-bot with config: {:?}", cfg);

    // --- Connect MongoDB ---
    let store = MongoUserStore::connect(&cfg.mongo.uri(), &cfg.mongo.db)
        .await
        .context("connecting to MongoDB")?;

    // --- Handle index mode ---
    if ensure_indexes {
        store.ensure_indexes().await?;
        tracing::info!("MongoDB indexes are in place.");
        return Ok(()); // exit after index creation
    }

    let state = AppState {
        bot: Arc::new(TelegramClient::new(&cfg.bot.token)),
        store: Arc::new(store),
        config: Arc::new(cfg.bot.clone()),
        languages: texts::SUPPORTED_LANGUAGES,
    };

    on_startup(&state).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    // --- Optional health server ---
    let health = match &cfg.health_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding health server to {}", addr))?;
            tracing::info!("Health server listening on http://{}", listener.local_addr()?);

            let app = routes::routes::routes().with_state(state.clone());
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    // --- Poll until a shutdown signal ---
    PollingService::new(state.clone(), cfg.poll_timeout)
        .run(shutdown.clone())
        .await;

    on_shutdown(&state).await;

    if let Some(handle) = health {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("Health server failed: {}", err),
            Err(err) => tracing::warn!("Health server task panicked: {}", err),
        }
    }

    tracing::info!("Bye");
    Ok(())
}

/// Drop any webhook (polling and webhooks are exclusive) and publish commands.
async fn on_startup(state: &AppState) -> Result<()> {
    state
        .bot
        .delete_webhook()
        .await
        .context("deleting webhook")?;
    commands::setup(state.bot.as_ref(), &state.config, state.languages)
        .await
        .context("setting bot commands")?;
    tracing::info!("Bot commands registered");
    Ok(())
}

/// Best-effort cleanup; failures are only logged.
async fn on_shutdown(state: &AppState) {
    if let Err(err) = commands::delete(state.bot.as_ref(), &state.config, state.languages).await {
        tracing::warn!("Could not delete bot commands: {}", err);
    }
    if let Err(err) = state.bot.delete_webhook().await {
        tracing::warn!("Could not delete webhook: {}", err);
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
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
    shutdown.cancel();
}
