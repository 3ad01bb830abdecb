//! Sluice Server: the HTTP layer of the query gateway.
//!
//! Exposes the shared connection pool via:
//! - **POST /**: ad hoc SQL execution with a streamed JSON array response.
//! - **POST /query/{name}**: named-query execution via the registry.
//! - **GET /**: pool and process statistics.
//! - **Observability**: Prometheus counters on `/metrics`.
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use sluice_common::circuit_breaker::CircuitBreaker;
use sluice_common::config::AppConfig;
use sluice_common::registry::QueryRegistry;

pub mod api;
pub mod executor;
pub mod stats;
pub mod stream;

pub use executor::Gateway;

// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static QUERY_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("sluice_queries_total", "Total number of queries executed");
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static ACTIVE_STREAMS: Lazy<IntGauge> = Lazy::new(|| {
    let opts = Opts::new(
        "sluice_active_streams",
        "Number of result streams currently being written",
    );
    let gauge = IntGauge::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub struct SluiceServer {
    config_path: String,
    listen_addr: Option<String>,
}

impl Default for SluiceServer {
    fn default() -> Self {
        Self {
            config_path: "config/sluice.yaml".to_string(),
            listen_addr: None,
        }
    }
}

impl SluiceServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config_path: &str) -> Self {
        self.config_path = config_path.to_string();
        self
    }

    /// Override the listen address from the configuration file.
    pub fn with_listen_addr(mut self, addr: &str) -> Self {
        self.listen_addr = Some(addr.to_string());
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let stdout_layer =
            tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry().with(stdout_layer).try_init().ok();

        let config = AppConfig::from_file(&self.config_path)?;
        let listen_addr = self
            .listen_addr
            .unwrap_or_else(|| config.server.listen_addr.clone());

        let registry = QueryRegistry::load_or_empty(Path::new(&config.named_queries));
        info!("loaded {} named queries", registry.len());

        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(config.database_url.clone());
        cfg.manager = Some(deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        });
        let pool = cfg
            .create_pool(None, tokio_postgres::NoTls)
            .context("Failed to create database pool")?;
        info!("database pool initialized");

        let gateway = Arc::new(Gateway::new(
            pool,
            registry,
            CircuitBreaker::new(config.breaker.clone()),
            config.flush_batch,
        ));

        let app = api::router(gateway);

        let listener = tokio::net::TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("Failed to bind {listen_addr}"))?;
        info!("Query gateway listening on {}", listen_addr);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();

    axum::response::Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
        .unwrap()
}

#[cfg(test)]
mod metrics_tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_metrics_endpoint_format() {
        // Touch metrics to ensure they are registered
        QUERY_COUNT.inc();
        let _ = ACTIVE_STREAMS.get();

        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body_str = String::from_utf8(body_bytes.to_vec()).unwrap();

        assert!(body_str.contains("sluice_queries_total"), "Body: {}", body_str);
        assert!(body_str.contains("sluice_active_streams"), "Body: {}", body_str);
    }
}
