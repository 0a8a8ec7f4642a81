//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.
//! The table filter may additionally come from an optional crawler config
//! file (`crawler.table_filter`), with environment variables taking priority.

use crate::introspection::TableFilter;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to read crawler config: {0}")]
    File(#[from] config::ConfigError),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// Connection settings for the crawled database
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
            require_tls: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// What to crawl
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    pub schema: String,
    pub table_filter: TableFilter,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            table_filter: TableFilter::default(),
        }
    }
}

/// Longest accepted retention period, in days
pub const MAX_RETENTION_DAYS: i64 = 36500;

/// Snapshot store location and retention
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub retention_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/schema_metadata.db"),
            retention_days: 30,
        }
    }
}

/// DDL audit log used for change attribution
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    pub table: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            table: "ddl_audit_log".to_string(),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub crawler: CrawlerConfig,
    pub store: StoreConfig,
    pub audit: AuditConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any variable lookup
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = ServerConfig {
            host: parsed(&var, "HOST")?.unwrap_or_else(|| ServerConfig::default().host),
            port: parsed(&var, "PORT")?.unwrap_or_else(|| ServerConfig::default().port),
        };

        let max_pool_size = parsed(&var, "DB_MAX_CONNECTIONS")?.unwrap_or(10);

        // DATABASE_URL first, individual variables otherwise
        let database = match var("DATABASE_URL") {
            Some(database_url) => Self::parse_database_url(&database_url, max_pool_size)?,
            None => DatabaseConfig {
                host: var("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
                port: parsed(&var, "DB_PORT")?.unwrap_or(5432),
                user: var("DB_USER").unwrap_or_else(|| "postgres".to_string()),
                password: var("DB_PASSWORD").unwrap_or_default(),
                database: var("DB_NAME").unwrap_or_else(|| "postgres".to_string()),
                max_pool_size,
                require_tls: var("DB_SSLMODE").is_some_and(|m| requires_tls(&m)),
            },
        };

        let cors = CorsConfig {
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|s| split_list(&s))
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let config_path = var("CRAWLER_CONFIG").unwrap_or_else(|| "config.yaml".to_string());
        let mut table_filter = Self::load_table_filter(&config_path)?;
        if let Some(v) = var("INCLUDE_TABLES") {
            table_filter.include_tables = split_list(&v);
        }
        if let Some(v) = var("EXCLUDE_TABLES") {
            table_filter.exclude_tables = split_list(&v);
        }
        if let Some(v) = var("INCLUDE_PATTERNS") {
            table_filter.include_patterns = split_list(&v);
        }
        if let Some(v) = var("EXCLUDE_PATTERNS") {
            table_filter.exclude_patterns = split_list(&v);
        }
        if let Some(v) = flag(&var, "FILTER_CASE_SENSITIVE")? {
            table_filter.case_sensitive = v;
        }

        let crawler = CrawlerConfig {
            schema: var("CRAWL_SCHEMA").unwrap_or_else(|| CrawlerConfig::default().schema),
            table_filter,
        };

        let store = StoreConfig {
            path: var("SNAPSHOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| StoreConfig::default().path),
            retention_days: parsed(&var, "SNAPSHOT_RETENTION_DAYS")?.unwrap_or(30),
        };
        if !(0..=MAX_RETENTION_DAYS).contains(&store.retention_days) {
            return Err(ConfigError::InvalidValue(format!(
                "SNAPSHOT_RETENTION_DAYS must be between 0 and {}",
                MAX_RETENTION_DAYS
            )));
        }

        let audit = AuditConfig {
            enabled: flag(&var, "AUDIT_ENABLED")?.unwrap_or(true),
            table: var("AUDIT_TABLE").unwrap_or_else(|| AuditConfig::default().table),
        };

        Ok(Self {
            server,
            database,
            cors,
            crawler,
            store,
            audit,
        })
    }

    /// Read `crawler.table_filter` from an optional config file
    pub fn load_table_filter(path: &str) -> Result<TableFilter, ConfigError> {
        let file = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        match file.get::<TableFilter>("crawler.table_filter") {
            Ok(filter) => Ok(filter),
            Err(config::ConfigError::NotFound(_)) => Ok(TableFilter::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str, max_pool_size: usize) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let require_tls = host.ends_with("neon.tech")
            || parsed
                .query_pairs()
                .any(|(k, v)| k == "sslmode" && requires_tls(&v));

        Ok(DatabaseConfig {
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database: parsed.path().trim_start_matches('/').to_string(),
            host,
            max_pool_size,
            require_tls,
        })
    }
}

fn requires_tls(mode: &str) -> bool {
    matches!(mode, "require" | "verify-ca" | "verify-full")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parsed<F, T>(var: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        None => Ok(None),
    }
}

fn flag<F>(var: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(v) => Err(ConfigError::InvalidValue(format!("{}={}", key, v))),
    }
}
