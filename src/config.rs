use crate::errors::{AppError, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Optional: when absent the service runs on the in-memory counter
    /// store only. Presence of this section is the sole switch for the
    /// distributed store.
    pub redis: Option<RedisConfig>,
    pub rate_limit: RateLimitConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout_seconds: u64,
    pub command_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Capacity bound of the in-memory counter store (LRU-evicted).
    pub memory_capacity: usize,
    /// Safety TTL for in-memory entries, independent of policy windows.
    pub memory_entry_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Determine environment
        let environment =
            env::var("WORKSPACE_API_ENV").unwrap_or_else(|_| "development".to_string());

        // Build configuration
        let config = config::Config::builder()
            // Start with default config
            .add_source(config::File::with_name("config/default"))
            // Add environment-specific config
            .add_source(
                config::File::with_name(&format!("config/{}", environment)).required(false),
            )
            // Add environment variables with prefix WORKSPACE_API
            // e.g., WORKSPACE_API__REDIS__URL=redis://localhost:6379
            .add_source(
                config::Environment::with_prefix("WORKSPACE_API")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        // Deserialize into our Config struct
        config
            .try_deserialize()
            .map_err(|e| AppError::Configuration(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate server config
        if self.server.port == 0 {
            return Err(AppError::Configuration("Invalid port number".to_string()));
        }

        // Validate database config
        if self.database.url.is_empty() {
            return Err(AppError::Configuration(
                "Database URL is required".to_string(),
            ));
        }

        // Validate Redis config when the section is present
        if let Some(redis) = &self.redis {
            if redis.url.is_empty() {
                return Err(AppError::Configuration(
                    "Redis URL must not be empty when [redis] is configured".to_string(),
                ));
            }
        }

        // Validate rate limit bounds
        if self.rate_limit.memory_capacity == 0 {
            return Err(AppError::Configuration(
                "Rate limit memory capacity must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.memory_entry_ttl_seconds == 0 {
            return Err(AppError::Configuration(
                "Rate limit memory entry TTL must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
