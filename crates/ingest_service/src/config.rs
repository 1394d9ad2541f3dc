//! Service configuration loaded from environment variables.

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use std::path::PathBuf;
use std::str::FromStr;
use tower_http::cors::{AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub metrics_port: u16,
    pub nats_url: String,
    /// Queue the consumer reads raw readings from.
    pub queue: String,
    /// Persist queued messages on the broker's disk.
    pub queue_durable: bool,
    pub table: String,
    pub database_path: PathBuf,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
    /// Allowed CORS methods. Empty allows any method.
    pub cors_methods: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `HTTP_PORT` (default: 5000)
    /// - `METRICS_PORT` (default: 9090)
    /// - `NATS_URL` (default: "nats://localhost:4222")
    /// - `SENSOR_QUEUE` (default: "sensor_data")
    /// - `SENSOR_QUEUE_DURABLE` (default: false)
    /// - `SENSOR_TABLE` (default: "sensor_data")
    /// - `DATABASE_PATH` (default: "sensor_data.db")
    /// - `CORS_ORIGIN`: comma-separated origins
    /// - `CORS_METHODS`: comma-separated methods
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            http_port: parse(&var("HTTP_PORT", "5000"), "HTTP_PORT")?,
            metrics_port: parse(&var("METRICS_PORT", "9090"), "METRICS_PORT")?,
            nats_url: var("NATS_URL", "nats://localhost:4222"),
            queue: var("SENSOR_QUEUE", "sensor_data"),
            queue_durable: parse(&var("SENSOR_QUEUE_DURABLE", "false"), "SENSOR_QUEUE_DURABLE")?,
            table: var("SENSOR_TABLE", "sensor_data"),
            database_path: PathBuf::from(var("DATABASE_PATH", "sensor_data.db")),
            cors_origins: split_list(&var("CORS_ORIGIN", "")),
            cors_methods: split_list(&var("CORS_METHODS", "")),
        })
    }

    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  HTTP_PORT: {}", self.http_port);
        info!("  METRICS_PORT: {}", self.metrics_port);
        info!("  NATS_URL: {}", self.nats_url);
        info!("  SENSOR_QUEUE: {} (durable: {})", self.queue, self.queue_durable);
        info!("  SENSOR_TABLE: {}", self.table);
        info!("  DATABASE_PATH: {}", self.database_path.display());
        info!("  CORS_ORIGIN: {:?}", self.cors_origins);
        info!("  CORS_METHODS: {:?}", self.cors_methods);
    }

    pub fn cors_layer(&self) -> Result<CorsLayer> {
        let origins = if self.cors_origins.is_empty() {
            AllowOrigin::from(Any)
        } else {
            let origins = self
                .cors_origins
                .iter()
                .map(|origin| {
                    HeaderValue::from_str(origin)
                        .with_context(|| format!("Invalid CORS origin '{}'", origin))
                })
                .collect::<Result<Vec<_>>>()?;
            AllowOrigin::list(origins)
        };

        let methods = if self.cors_methods.is_empty() {
            AllowMethods::from(Any)
        } else {
            let methods = self
                .cors_methods
                .iter()
                .map(|method| {
                    Method::from_str(&method.to_uppercase())
                        .with_context(|| format!("Invalid CORS method '{}'", method))
                })
                .collect::<Result<Vec<_>>>()?;
            AllowMethods::list(methods)
        };

        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any))
    }
}

fn parse<T>(value: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be valid, got '{}'", key, value))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.http_port, 5000);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.queue, "sensor_data");
        assert!(!config.queue_durable);
        assert_eq!(config.table, "sensor_data");
        assert_eq!(config.database_path, PathBuf::from("sensor_data.db"));
        assert!(config.cors_origins.is_empty());
        assert!(config.cors_layer().is_ok());
    }

    #[test]
    fn test_custom_values() {
        let config = config(&[
            ("HTTP_PORT", "8080"),
            ("SENSOR_QUEUE", "lab_readings"),
            ("SENSOR_QUEUE_DURABLE", "true"),
            ("CORS_ORIGIN", "http://localhost:3000, https://dash.example.com,"),
            ("CORS_METHODS", "get,POST"),
        ])
        .unwrap();

        assert_eq!(config.http_port, 8080);
        assert_eq!(config.queue, "lab_readings");
        assert!(config.queue_durable);
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:3000", "https://dash.example.com"]
        );
        assert_eq!(config.cors_methods, vec!["get", "POST"]);
        assert!(config.cors_layer().is_ok());
    }

    #[test]
    fn test_invalid_port() {
        let err = config(&[("HTTP_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("HTTP_PORT"));
    }

    #[test]
    fn test_invalid_cors_origin() {
        let config = config(&[("CORS_ORIGIN", "http://bad\norigin")]).unwrap();
        assert!(config.cors_layer().is_err());
    }
}
