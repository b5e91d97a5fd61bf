use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub catalog: CatalogConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("DONATION_VOTE_CONFIG")
            .unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("DONATION_VOTE_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        ensure!(self.server.port > 0, "Server port must be greater than zero");
        ensure!(
            self.database.max_connections >= self.database.min_connections.unwrap_or(1),
            "Max connections must be >= min connections"
        );
        ensure!(
            self.database.max_connections <= 128,
            "Connection pool oversized"
        );
        self.webhook.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        self.results.ensure_bounds()?;
        self.ledger.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

/// Gateway webhook route and query parameter names. The gateway decides
/// the parameter names, so they are deployment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub path: String,
    #[serde(default = "WebhookConfig::default_data_param")]
    pub data_param: String,
    #[serde(default = "WebhookConfig::default_donation_param")]
    pub donation_param: String,
    #[serde(default = "WebhookConfig::default_identity_param")]
    pub identity_param: String,
    #[serde(default = "WebhookConfig::default_shortcode_param")]
    pub shortcode_param: String,
    #[serde(default = "WebhookConfig::default_transaction_param")]
    pub transaction_param: String,
}

impl WebhookConfig {
    fn ensure_bounds(&self) -> Result<()> {
        ensure!(!self.path.is_empty(), "Webhook path must be specified");
        ensure!(
            self.path
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'),
            "Webhook path must be a single URL-safe segment"
        );
        for param in [
            &self.data_param,
            &self.donation_param,
            &self.identity_param,
            &self.shortcode_param,
            &self.transaction_param,
        ] {
            ensure!(!param.is_empty(), "Webhook parameter names must be non-empty");
        }
        Ok(())
    }

    fn default_data_param() -> String {
        "data".to_string()
    }

    fn default_donation_param() -> String {
        "tariff".to_string()
    }

    fn default_identity_param() -> String {
        "msisdn".to_string()
    }

    fn default_shortcode_param() -> String {
        "keyword".to_string()
    }

    fn default_transaction_param() -> String {
        "transaction_id".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub prevote_ttl_seconds: u64,
    pub prevote_max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prevote_ttl_seconds: 300,
            prevote_max_capacity: 100_000,
        }
    }
}

impl CacheConfig {
    pub fn prevote_ttl(&self) -> Duration {
        Duration::from_secs(self.prevote_ttl_seconds)
    }

    fn ensure_bounds(&self) -> Result<()> {
        ensure!(
            self.prevote_ttl_seconds >= 10,
            "Pre-vote TTL must be at least 10 seconds"
        );
        ensure!(
            self.prevote_ttl_seconds <= 86_400,
            "Pre-vote TTL cannot exceed one day"
        );
        ensure!(
            self.prevote_max_capacity >= 100,
            "Pre-vote cache capacity must be at least 100"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfig {
    pub recompute_interval_seconds: u64,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            recompute_interval_seconds: 300,
        }
    }
}

impl ResultsConfig {
    pub fn recompute_interval(&self) -> Duration {
        Duration::from_secs(self.recompute_interval_seconds)
    }

    fn ensure_bounds(&self) -> Result<()> {
        ensure!(
            self.recompute_interval_seconds >= 5,
            "Recompute interval must be >= 5 seconds"
        );
        ensure!(
            self.recompute_interval_seconds <= 86_400,
            "Recompute interval must be <= one day"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_ms: Option<u64>,
    #[serde(default = "LedgerConfig::default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            timeout_ms: None,
            queue_capacity: Self::default_queue_capacity(),
        }
    }
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.timeout_ms.unwrap_or(3_000);
        assert!(millis >= 100, "Ledger timeout must be at least 100ms");
        assert!(millis <= 60_000, "Ledger timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }

    fn ensure_bounds(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        ensure!(
            self.base_url.starts_with("http://") || self.base_url.starts_with("https://"),
            "Ledger base URL must be http(s) when relay is enabled"
        );
        if let Some(millis) = self.timeout_ms {
            ensure!(
                (100..=60_000).contains(&millis),
                "Ledger timeout must be between 100ms and 60s"
            );
        }
        ensure!(
            (1..=65_536).contains(&self.queue_capacity),
            "Ledger queue capacity out of bounds"
        );
        Ok(())
    }

    const fn default_queue_capacity() -> usize {
        1024
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub representatives_path: String,
    pub charities_path: String,
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
