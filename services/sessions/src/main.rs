use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod broadcast;
mod config;
mod error;
mod models;
mod routes;
mod state;
mod store;

use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool},
};

use crate::{
    broadcast::RedisBroadcast, config::ServiceConfig, state::AppState, store::PgSessionStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting sessions service");

    let config = ServiceConfig::from_env();
    let default_time_control = config.time_control()?;
    info!("Default time control: {}", default_time_control);

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;
    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let store = PgSessionStore::new(pool);
    store.ensure_schema().await?;

    // Initialize Redis for snapshot fan-out
    let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
    if !redis.health_check().await? {
        anyhow::bail!("Failed to connect to Redis");
    }

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(store, RedisBroadcast::new(redis), config);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Sessions service listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
