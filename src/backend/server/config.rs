/**
 * Server Configuration
 *
 * Loads the `ChatConfig` and connects the optional backing services.
 *
 * # Configuration Sources
 *
 * 1. Built-in defaults
 * 2. The TOML file named by `XFCHAT_CONFIG`, if set
 * 3. Environment overrides: `SERVER_PORT`, `DATABASE_URL`, `REDIS_URL`,
 *    `JWT_SECRET`
 *
 * # Error Handling
 *
 * A bad configuration file or value is an error. Unreachable services are
 * not: without PostgreSQL the server keeps messages in memory, without Redis
 * it keeps presence in memory. Both are logged loudly.
 */

use sqlx::PgPool;
use std::sync::Arc;

use crate::backend::presence::{MemoryPresenceBackend, PresenceBackend, RedisPresenceBackend};
use crate::backend::storage::{ChatStorage, MemoryStorage, PgStorage};
use crate::shared::config::{ChatConfig, ConfigError};

/// Build the configuration from file and environment
pub fn load_config() -> Result<ChatConfig, ConfigError> {
    let mut config = match std::env::var("XFCHAT_CONFIG") {
        Ok(path) => {
            tracing::info!("[Config] Loading {}", path);
            let source = std::fs::read_to_string(&path)?;
            ChatConfig::from_toml_str(&source)?
        }
        Err(_) => ChatConfig::default(),
    };

    if let Ok(port) = std::env::var("SERVER_PORT") {
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::invalid("SERVER_PORT", format!("not a port number: {}", port)))?;
        config.bind_address = format!("0.0.0.0:{}", port);
    }
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database_url = Some(url);
    }
    if let Ok(url) = std::env::var("REDIS_URL") {
        config.redis_url = Some(url);
    }
    match std::env::var("JWT_SECRET") {
        Ok(secret) => config.jwt_secret = secret,
        Err(_) => tracing::warn!("[Config] JWT_SECRET not set, using the configured secret"),
    }

    config.validate()?;
    Ok(config)
}

/// Connect PostgreSQL and run migrations, or fall back to memory storage
pub async fn load_storage(config: &ChatConfig) -> Arc<dyn ChatStorage> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("[Config] DATABASE_URL not set. Messages are kept in memory only.");
        return Arc::new(MemoryStorage::new());
    };

    tracing::info!("[Config] Connecting to database...");
    let pool = match PgPool::connect(database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("[Config] Failed to create database connection pool: {:?}", e);
            tracing::warn!("[Config] Messages are kept in memory only.");
            return Arc::new(MemoryStorage::new());
        }
    };

    tracing::info!("[Config] Running database migrations...");
    match sqlx::migrate!().run(&pool).await {
        Ok(_) => tracing::info!("[Config] Database migrations completed successfully"),
        Err(e) => {
            tracing::error!("[Config] Failed to run database migrations: {}", e);
            tracing::warn!("[Config] Continuing, the schema might not be up to date");
        }
    }

    Arc::new(PgStorage::new(pool))
}

/// Connect Redis for presence, or fall back to in-process presence
pub async fn load_presence_backend(config: &ChatConfig) -> Arc<dyn PresenceBackend> {
    let Some(redis_url) = config.redis_url.as_deref() else {
        tracing::warn!("[Config] REDIS_URL not set. Presence is tracked in this process only.");
        return Arc::new(MemoryPresenceBackend::new());
    };

    match RedisPresenceBackend::connect(redis_url).await {
        Ok(backend) => {
            tracing::info!("[Config] Presence backed by Redis");
            Arc::new(backend)
        }
        Err(e) => {
            tracing::error!("[Config] Failed to connect to Redis: {}", e);
            tracing::warn!("[Config] Presence is tracked in this process only.");
            Arc::new(MemoryPresenceBackend::new())
        }
    }
}
