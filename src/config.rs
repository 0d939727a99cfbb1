use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::constants;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub pagination: PaginationConfig,
    pub billing: BillingConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    pub bootstrap: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub secret_key: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub password_rounds: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: constants::DEV_SECRET_KEY.to_string(),
            access_token_minutes: constants::ACCESS_TOKEN_MINUTES,
            refresh_token_days: constants::REFRESH_TOKEN_DAYS,
            password_rounds: constants::PASSWORD_ROUNDS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot file. When unset the store lives only in memory.
    pub data_file: Option<PathBuf>,
}

impl StorageConfig {
    /// Snapshot path for commands whose changes must outlive the process.
    pub fn require_data_file(&self) -> Result<&Path, ConfigError> {
        self.data_file.as_deref().ok_or_else(|| {
            ConfigError::Invalid(
                "storage.data_file (or WASTE_DATA_FILE) must be set; without it nothing is saved".to_string(),
            )
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub page_size: usize,
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: constants::DEFAULT_PAGE_SIZE,
            max_page_size: constants::MAX_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Flat fee per billed pickup, e.g. `"10.00"`.
    pub base_fee: Decimal,
    pub per_kg_fee: Decimal,
    pub due_days: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            base_fee: Decimal::new(constants::PICKUP_BASE_FEE_CENTS, 2),
            per_kg_fee: Decimal::new(constants::PICKUP_PER_KG_CENTS, 2),
            due_days: constants::INVOICE_DUE_DAYS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Port for the Prometheus exporter; disabled when unset.
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: constants::DEFAULT_LOG_DIR.to_string(),
            file_prefix: "waste_collection.log".to_string(),
        }
    }
}

/// Administrator account created at startup when missing.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Config {
    /// Load configuration from `path`, falling back to `config.toml` in the
    /// working directory. An explicitly given path must exist; the default
    /// one may be absent, in which case built-in defaults are used.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(constants::DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;

        if config.auth.secret_key == constants::DEV_SECRET_KEY {
            warn!("Using the built-in development secret key; set WASTE_SECRET_KEY in production");
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("WASTE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a valid port: {port}")))?;
        }
        if let Ok(secret) = env::var("WASTE_SECRET_KEY") {
            self.auth.secret_key = secret;
        }
        if let Ok(file) = env::var("WASTE_DATA_FILE") {
            self.storage.data_file = Some(PathBuf::from(file));
        }
        if let Ok(port) = env::var("WASTE_METRICS_PORT") {
            let port = port.parse().map_err(|_| {
                ConfigError::Invalid(format!("WASTE_METRICS_PORT is not a valid port: {port}"))
            })?;
            self.metrics.port = Some(port);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret_key.len() < 16 {
            return Err(ConfigError::Invalid(
                "auth.secret_key must be at least 16 characters".to_string(),
            ));
        }
        if self.auth.access_token_minutes <= 0 || self.auth.refresh_token_days <= 0 {
            return Err(ConfigError::Invalid("token lifetimes must be positive".to_string()));
        }
        if self.auth.password_rounds == 0 {
            return Err(ConfigError::Invalid("auth.password_rounds must be positive".to_string()));
        }
        if self.pagination.page_size == 0 || self.pagination.page_size > self.pagination.max_page_size {
            return Err(ConfigError::Invalid(
                "pagination.page_size must be between 1 and max_page_size".to_string(),
            ));
        }
        let billing = &self.billing;
        if billing.base_fee.is_sign_negative() || billing.per_kg_fee.is_sign_negative() || billing.due_days < 0 {
            return Err(ConfigError::Invalid("billing values must not be negative".to_string()));
        }
        Ok(())
    }
}
