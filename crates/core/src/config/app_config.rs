use crate::config::{ConfigError, ConfigSource};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration trait for application configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Environment enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::invalid_value(
                "environment",
                s,
                "development, testing, or production",
            )),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_str = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        };
        write!(f, "{}", env_str)
    }
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn is_testing(&self) -> bool {
        matches!(self, Environment::Testing)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Plain,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "plain" | "text" => Ok(LogFormat::Plain),
            _ => Err(ConfigError::invalid_value("log_format", s, "json, pretty, or plain")),
        }
    }
}

impl LogFormat {
    fn default_for(environment: Environment) -> Self {
        if environment.is_production() {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Connection pool sizing and timeouts.
///
/// The embedded backend ignores the sizes and always keeps one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Bounds every connection acquire
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: Some(600),
            max_lifetime_secs: Some(1800),
        }
    }
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite://ordinal.db";

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

static TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("table name pattern is valid"));

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub pool: PoolSettings,
    pub migrations_dir: PathBuf,
    pub migrations_table: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            environment: Environment::Development,
            host: "127.0.0.1".to_string(),
            port: 3000,
            database_url: Some(DEFAULT_DATABASE_URL.to_string()),
            pool: PoolSettings::default(),
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: "schema_migrations".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }

    pub fn testing() -> Self {
        Self {
            environment: Environment::Testing,
            port: 0, // Random port for tests
            database_url: Some("sqlite::memory:".to_string()),
            log_level: "warn".to_string(),
            log_format: LogFormat::Plain,
            ..Self::new()
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None, // Must be provided via env
            log_format: LogFormat::Json,
            ..Self::new()
        }
    }

    /// Build from an arbitrary variable lookup; `from_env` passes `std::env::var`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("ENVIRONMENT") {
            Some(value) => value.parse()?,
            None => Environment::Development,
        };

        let mut config = if environment.is_production() {
            Self::production()
        } else {
            Self {
                environment,
                ..Self::new()
            }
        };
        config.log_format = LogFormat::default_for(environment);

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse_number("port", &port, "valid port number (0-65535)")?;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Some(value) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.pool.max_connections = parse_number("database_max_connections", &value, "positive integer")?;
        }
        if let Some(value) = lookup("DATABASE_MIN_CONNECTIONS") {
            config.pool.min_connections = parse_number("database_min_connections", &value, "non-negative integer")?;
        }
        if let Some(value) = lookup("DATABASE_CONNECT_TIMEOUT") {
            config.pool.connect_timeout_secs = parse_number("database_connect_timeout", &value, "seconds")?;
        }
        if let Some(value) = lookup("DATABASE_IDLE_TIMEOUT") {
            let secs: u64 = parse_number("database_idle_timeout", &value, "seconds (0 disables)")?;
            config.pool.idle_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(dir) = lookup("MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }
        if let Some(table) = lookup("MIGRATIONS_TABLE") {
            config.migrations_table = table;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The configured database URL; validation guarantees it outside production
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::missing_required("database_url", "set DATABASE_URL to a sqlite: or postgres:// URL")
        })
    }

    fn uses_embedded_database(&self) -> bool {
        self.database_url.as_deref().is_some_and(|url| url.starts_with("sqlite:"))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number<T: FromStr>(field: &str, value: &str, expected: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_value(field, value, expected))
}

impl AppConfigTrait for AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.environment.is_testing() && self.port == 0 {
            return Err(ConfigError::invalid_value(
                "port",
                self.port.to_string(),
                "port between 1 and 65535",
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::invalid_value(
                "log_level",
                self.log_level.clone(),
                format!("one of: {}", VALID_LOG_LEVELS.join(", ")),
            ));
        }

        if self.pool.max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "database_max_connections",
                "0",
                "at least 1",
            ));
        }

        if self.pool.min_connections > self.pool.max_connections {
            return Err(ConfigError::validation_failed(format!(
                "database_min_connections ({}) exceeds database_max_connections ({})",
                self.pool.min_connections, self.pool.max_connections
            )));
        }

        if !TABLE_NAME.is_match(&self.migrations_table) {
            return Err(ConfigError::invalid_value(
                "migrations_table",
                self.migrations_table.clone(),
                "a plain SQL identifier ([A-Za-z_][A-Za-z0-9_]*)",
            ));
        }

        if self.environment.is_production() {
            if self.database_url.is_none() {
                return Err(ConfigError::missing_required(
                    "database_url",
                    "DATABASE_URL environment variable is required in production",
                ));
            }

            if self.uses_embedded_database() {
                return Err(ConfigError::invalid_value(
                    "database_url",
                    "sqlite:...",
                    "a postgres:// URL in production environment",
                ));
            }
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let defaults = [
            ("environment", "ENVIRONMENT", "development"),
            ("host", "HOST", "127.0.0.1"),
            ("port", "PORT", "3000"),
            ("database_url", "DATABASE_URL", DEFAULT_DATABASE_URL),
            ("database_max_connections", "DATABASE_MAX_CONNECTIONS", "10"),
            ("database_min_connections", "DATABASE_MIN_CONNECTIONS", "1"),
            ("database_connect_timeout", "DATABASE_CONNECT_TIMEOUT", "30"),
            ("database_idle_timeout", "DATABASE_IDLE_TIMEOUT", "600"),
            ("migrations_dir", "MIGRATIONS_DIR", "migrations"),
            ("migrations_table", "MIGRATIONS_TABLE", "schema_migrations"),
            ("log_level", "LOG_LEVEL", "info"),
            ("log_format", "LOG_FORMAT", "based on environment"),
        ];

        defaults
            .into_iter()
            .map(|(field, var, default)| {
                let source = if env::var(var).is_ok() {
                    ConfigSource::EnvVar(var.to_string())
                } else {
                    ConfigSource::Default(default.to_string())
                };
                (field.to_string(), source)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.database_url.as_deref(), Some(DEFAULT_DATABASE_URL));
        assert_eq!(config.pool, PoolSettings::default());
        assert_eq!(config.migrations_table, "schema_migrations");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_pool_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("DATABASE_MIN_CONNECTIONS", "2"),
            ("DATABASE_CONNECT_TIMEOUT", "5"),
            ("DATABASE_IDLE_TIMEOUT", "0"),
        ]))
        .unwrap();
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.min_connections, 2);
        assert_eq!(config.pool.connect_timeout_secs, 5);
        assert_eq!(config.pool.idle_timeout_secs, None);
    }

    #[test]
    fn test_min_above_max_rejected() {
        let result = AppConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "2"),
            ("DATABASE_MIN_CONNECTIONS", "3"),
        ]));
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn test_bad_number_names_field() {
        let err = AppConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(err.field(), Some("port"));
    }

    #[test]
    fn test_production_requires_networked_database() {
        let err = AppConfig::from_lookup(lookup(&[("ENVIRONMENT", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));

        let err = AppConfig::from_lookup(lookup(&[
            ("ENVIRONMENT", "production"),
            ("DATABASE_URL", "sqlite://prod.db"),
        ]))
        .unwrap_err();
        assert_eq!(err.field(), Some("database_url"));

        let config = AppConfig::from_lookup(lookup(&[
            ("ENVIRONMENT", "production"),
            ("DATABASE_URL", "postgres://app:secret@db/app"),
        ]))
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_migrations_table_must_be_identifier() {
        let err = AppConfig::from_lookup(lookup(&[("MIGRATIONS_TABLE", "ledger; DROP TABLE x")])).unwrap_err();
        assert_eq!(err.field(), Some("migrations_table"));
    }

    #[test]
    fn test_port_zero_only_in_testing() {
        let mut config = AppConfig::testing();
        config.port = 0;
        assert!(config.validate().is_ok());

        let mut config = AppConfig::new();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_level() {
        let err = AppConfig::from_lookup(lookup(&[("LOG_LEVEL", "loud")])).unwrap_err();
        assert_eq!(err.field(), Some("log_level"));
    }

    #[test]
    #[serial]
    fn test_from_env_and_sources() {
        env::set_var("MIGRATIONS_DIR", "db/migrations");
        env::remove_var("PORT");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));

        let sources = config.config_sources();
        assert!(sources["migrations_dir"].is_env_var());
        assert!(sources["port"].is_default());

        env::remove_var("MIGRATIONS_DIR");
    }
}
