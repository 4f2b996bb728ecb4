use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use api::{
    config::{ApiConfig, StorageBackend},
    middleware::JwtKeys,
    repositories::Stores,
    routes,
    state::AppState,
};
use booking::{LabTimezone, MemoryStore, SystemClock, models::Lab};
use common::{
    database::{DatabaseConfig, health_check, init_pool, run_migrations},
    events::{LabEventPublisher, RedisConfig},
};
use tokio::net::TcpListener;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    info!("Starting API service");

    let config = ApiConfig::load().context("invalid configuration")?;
    let timezone = LabTimezone::from_offset_minutes(config.lab_utc_offset_minutes)
        .context("invalid lab UTC offset")?;
    let jwt = JwtKeys::from_env().map_err(anyhow::Error::msg)?;

    let state = match config.storage {
        StorageBackend::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let pool = init_pool(&db_config).await?;

            if health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }
            run_migrations(&pool, &MIGRATOR).await?;

            AppState::new(
                Stores::postgres(pool.clone()),
                Arc::new(SystemClock),
                timezone,
                jwt,
            )
            .with_pool(pool)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; every reservation is lost on restart");
            let store = MemoryStore::with_labs((1..=config.memory_labs).map(|id| Lab {
                id,
                name: format!("Laboratorio {}", id),
                pc_count: config.memory_pcs_per_lab,
                free_mode: false,
                standard_grid: false,
            }))
            .await;

            AppState::new(Stores::memory(store), Arc::new(SystemClock), timezone, jwt)
        }
    };

    let state = if config.publish_events {
        let publisher = LabEventPublisher::new(&RedisConfig::from_env()?)?;
        match publisher.health_check().await {
            Ok(true) => info!("Publishing lab events to Redis"),
            _ => warn!("Redis is not answering yet; lab events will be retried per mutation"),
        }
        state.with_events(publisher)
    } else {
        state
    };

    // Start the web server
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("API service listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
