use crate::circuit_breaker::CircuitBreakerConfig;
use anyhow::{Context, Result};
use serde::Deserialize;

// Default constants
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_NAMED_QUERIES_PATH: &str = "queries.yml";
pub const DEFAULT_FLUSH_BATCH: usize = 100;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;
/// Upper bound on client-supplied timeouts; "no timeout" does not exist
/// and neither does a deadline past the process lifetime.
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_named_queries() -> String {
    DEFAULT_NAMED_QUERIES_PATH.to_string()
}

fn default_flush_batch() -> usize {
    DEFAULT_FLUSH_BATCH
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,

    /// PostgreSQL connection string. `DB_URL` is honored as a fallback
    /// when neither the file nor `SLUICE_DATABASE_URL` provides one.
    #[serde(default)]
    pub database_url: String,

    /// Path to the named-query source; format is selected by extension.
    #[serde(default = "default_named_queries")]
    pub named_queries: String,

    /// Row count interval at which buffered output is forced to the
    /// transport.
    #[serde(default = "default_flush_batch")]
    pub flush_batch: usize,

    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        // Map SLUICE_SERVER__LISTEN_ADDR to server.listen_addr, etc.
        let builder = builder.add_source(
            config::Environment::with_prefix("SLUICE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let mut app_config: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if app_config.database_url.is_empty() {
            if let Ok(url) = std::env::var("DB_URL") {
                app_config.database_url = url;
            }
        }

        Ok(app_config)
    }
}
