//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running with `SKIP_EXTERNALS=true`.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub processor: ProcessorConfig,
    pub billing: BillingConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub webhook_tolerance_secs: i64,
    pub currency: String,
}

/// Billing run, scheduler and shared-secret settings
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub cron_secret: String,
    pub admin_token: String,
    /// Day of month on or after which the scheduler bills the current month
    pub run_day: u32,
    pub max_concurrency: usize,
    pub scheduler_enabled: bool,
    pub scheduler_interval_secs: u64,
}

fn parse_var<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().trim().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = flag("SKIP_EXTERNALS");
        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            processor: ProcessorConfig::from_env()?,
            billing: BillingConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        if !self.skip_externals {
            self.processor.validate()?;
        }
        self.billing.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            webhook_tolerance_secs: 300,
            currency: "usd".to_string(),
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ProcessorConfig::default();
        Ok(ProcessorConfig {
            secret_key: env::var("PROCESSOR_SECRET_KEY").unwrap_or_default(),
            webhook_secret: env::var("PROCESSOR_WEBHOOK_SECRET").unwrap_or_default(),
            base_url: env::var("PROCESSOR_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: parse_var("PROCESSOR_TIMEOUT_SECS", "30")?,
            max_retries: parse_var("PROCESSOR_MAX_RETRIES", "3")?,
            webhook_tolerance_secs: parse_var("PROCESSOR_WEBHOOK_TOLERANCE_SECS", "300")?,
            currency: env::var("PROCESSOR_CURRENCY")
                .unwrap_or(defaults.currency)
                .to_lowercase(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::MissingVariable(
                "PROCESSOR_SECRET_KEY".to_string(),
            ));
        }

        if self.webhook_secret.trim().is_empty() {
            return Err(ConfigError::MissingVariable(
                "PROCESSOR_WEBHOOK_SECRET".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PROCESSOR_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PROCESSOR_TIMEOUT_SECS".to_string(),
            ));
        }

        if self.webhook_tolerance_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "PROCESSOR_WEBHOOK_TOLERANCE_SECS".to_string(),
            ));
        }

        if self.currency.len() != 3 {
            return Err(ConfigError::InvalidValue("PROCESSOR_CURRENCY".to_string()));
        }

        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            cron_secret: String::new(),
            admin_token: String::new(),
            run_day: 1,
            max_concurrency: 4,
            scheduler_enabled: false,
            scheduler_interval_secs: 3600,
        }
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(BillingConfig {
            cron_secret: env::var("BILLING_CRON_SECRET").unwrap_or_default(),
            admin_token: env::var("ADMIN_API_TOKEN").unwrap_or_default(),
            run_day: parse_var("BILLING_RUN_DAY", "1")?,
            max_concurrency: parse_var("BILLING_MAX_CONCURRENCY", "4")?,
            scheduler_enabled: flag("BILLING_SCHEDULER_ENABLED"),
            scheduler_interval_secs: parse_var("BILLING_SCHEDULER_INTERVAL_SECS", "3600")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=28).contains(&self.run_day) {
            return Err(ConfigError::ValidationFailed(
                "BILLING_RUN_DAY must be between 1 and 28".to_string(),
            ));
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "BILLING_MAX_CONCURRENCY".to_string(),
            ));
        }

        if self.scheduler_enabled && self.scheduler_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "BILLING_SCHEDULER_INTERVAL_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
