use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// SQLite settings.
    pub database: DatabaseConfig,
    /// Log level and output format.
    pub logging: LoggingConfig,
    /// Timeouts and retries for gateway requests.
    pub request: RequestConfig,
    /// Backend selection and remote endpoint.
    pub gateway: GatewayConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file (`DATABASE_PATH`).
    pub path: PathBuf,
    /// Pool size (`DATABASE_MAX_CONNECTIONS`).
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive (`LOG_LEVEL`), overridden by `RUST_LOG`.
    pub level: String,
    /// Output format (`LOG_FORMAT`).
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// HTTP request configuration for the remote gateway
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-attempt timeout (`REQUEST_TIMEOUT_MS`).
    pub timeout_ms: u64,
    /// Retries after the first attempt (`MAX_RETRIES`).
    pub max_retries: u32,
    /// Initial backoff, doubled per retry (`RETRY_DELAY_MS`).
    pub retry_delay_ms: u64,
}

/// Which persistence gateway backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Embedded SQLite database at `DATABASE_PATH`.
    Sqlite,
    /// REST gateway at `GATEWAY_BASE_URL`.
    Remote,
}

/// Remote gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Backend selection (`STORAGE_BACKEND`).
    pub backend: StorageBackend,
    /// Remote gateway root (`GATEWAY_BASE_URL`).
    pub base_url: String,
    /// Bearer token for the remote gateway (`GATEWAY_API_KEY`).
    pub api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/qgrid.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        };

        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => StorageBackend::Sqlite,
            "remote" => StorageBackend::Remote,
            other => {
                return Err(AppError::Config {
                    message: format!("Unknown STORAGE_BACKEND: {}", other),
                })
            }
        };

        let base_url = env::var("GATEWAY_BASE_URL").unwrap_or_default();
        if backend == StorageBackend::Remote && base_url.is_empty() {
            return Err(AppError::Config {
                message: "GATEWAY_BASE_URL is required when STORAGE_BACKEND=remote".to_string(),
            });
        }

        let gateway = GatewayConfig {
            backend,
            base_url,
            api_key: env::var("GATEWAY_API_KEY").ok().filter(|k| !k.is_empty()),
        };

        Ok(Config {
            database,
            logging,
            request,
            gateway,
        })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/qgrid.db"),
            max_connections: 5,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            base_url: String::new(),
            api_key: None,
        }
    }
}
