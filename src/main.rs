//! Rentline lifecycle worker
//!
//! Connects to the marketplace database and runs the background side of the
//! lifecycle engine: the periodic sweep that flips ended boost windows to
//! expired. Transports embed the services from `rentline-services` directly.

use anyhow::Context;
use rentline_core::AppConfig;
use rentline_db::{create_pool, run_migrations, PgAdvertisementRepository, PgPostRepository};
use rentline_services::{AdvertisementLifecycle, SystemClock};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "rentline={},rentline_services={},rentline_db={},sqlx=warn",
            log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Rentline worker v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, Some(config.database.max_connections))
        .await
        .context("failed to connect to database")?;

    if config.database.run_migrations {
        run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
    }

    let advertisements = AdvertisementLifecycle::new(
        Arc::new(PgAdvertisementRepository::new(pool.clone())),
        Arc::new(PgPostRepository::new(pool.clone())),
        Arc::new(SystemClock),
    );

    let period = Duration::from_secs(config.sweeper.interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    info!(
        "Advertisement sweep every {}s, refund policy {:?}",
        period.as_secs(),
        config.payments.refund_policy
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match advertisements.sweep_expired().await {
                    Ok(0) => {}
                    Ok(expired) => info!("Expired {} boost windows", expired),
                    Err(e) => error!("Advertisement sweep failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    pool.close().await;
    info!("Rentline worker stopped");

    Ok(())
}
