//! Handoff server - delivery and review lifecycle for outsourced creative production

use clap::Parser;
use handoff::clock::SystemClock;
use handoff::config::Config;
use handoff::store::MIGRATOR;
use handoff::{routes, AppState};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "handoff=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    let engine_config = config.engine_config()?;

    // Database connection
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    // Run migrations
    MIGRATOR.run(&pool).await?;

    let state = AppState::with_engine(pool, Arc::new(SystemClock), engine_config);

    if let Some(interval) = config.reconcile_interval() {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = state.engine.reconcile_lateness().await {
                    tracing::error!("Lateness reconciliation failed: {}", e);
                }
            }
        });
        tracing::info!("Lateness reconciliation every {:?}", interval);
    }

    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
