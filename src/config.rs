use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::{LedgerError, LedgerResult};
use crate::retention::{Protections, RetentionSchedule};

pub const CONFIG_PATH_VAR: &str = "LEDGER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "ledger";
pub const ENV_PREFIX: &str = "LEDGER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub retention: RetentionConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub backend: String,
    pub max_connections: u32,
    pub immutable: bool,
    pub strict_immutable: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://action-ledger.db".to_string(),
            backend: "sqlite".to_string(),
            max_connections: 5,
            immutable: true,
            strict_immutable: false,
        }
    }
}

impl DatabaseConfig {
    pub fn backend_kind(&self) -> LedgerResult<BackendKind> {
        match self.backend.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Sqlite),
            "memory" => Ok(BackendKind::Memory),
            other => Err(LedgerError::Config(format!(
                "Unknown storage backend '{}': expected sqlite or memory",
                other
            ))),
        }
    }
}

/// Zero disables the corresponding setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: u32,
    pub frequency_seconds: i64,
    pub max_days: u32,
    pub min_remaining: u64,
}

impl RetentionConfig {
    pub fn protections(&self) -> Protections {
        Protections::from_limits(self.max_days, self.min_remaining)
    }

    pub fn schedule(&self) -> Option<RetentionSchedule> {
        RetentionSchedule::new(self.days, self.frequency_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub webhook_url: String,
    pub timeout_seconds: u64,
    pub default_window_seconds: i64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            timeout_seconds: 3,
            default_window_seconds: 3600,
        }
    }
}

impl AlertsConfig {
    pub fn webhook(&self) -> Option<&str> {
        Some(self.webhook_url.trim()).filter(|url| !url.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

impl AppConfig {
    /// Load `ledger.toml` (or the file named by `LEDGER_CONFIG`), then apply
    /// `LEDGER__SECTION__KEY` environment overrides.
    pub fn load() -> LedgerResult<Self> {
        let file = match env::var(CONFIG_PATH_VAR) {
            Ok(path) => File::with_name(&path).required(true),
            Err(_) => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Self::build(file)
    }

    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        Self::build(File::from(path).required(true))
    }

    fn build(file: File<config::FileSourceFile, config::FileFormat>) -> LedgerResult<Self> {
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LedgerError::Config(format!("Failed to load configuration: {}", e)))?;

        let app: AppConfig = config
            .try_deserialize()
            .map_err(|e| LedgerError::Config(format!("Invalid configuration: {}", e)))?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.server.port == 0 {
            return Err(LedgerError::Config("server.port must not be 0".to_string()));
        }
        self.database.backend_kind()?;
        if self.database.max_connections == 0 {
            return Err(LedgerError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.alerts.default_window_seconds <= 0 {
            return Err(LedgerError::Config(
                "alerts.default_window_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.database.backend_kind().unwrap(), BackendKind::Sqlite);
        assert!(config.alerts.webhook().is_none());
        assert!(config.retention.schedule().is_none());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.backend = "postgres".to_string();
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));

        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[database]
backend = "memory"

[retention]
days = 30
frequency_seconds = 3600
min_remaining = 10

[alerts]
webhook_url = "http://localhost:9999/hook"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.backend_kind().unwrap(), BackendKind::Memory);
        assert_eq!(
            config.retention.schedule(),
            RetentionSchedule::new(30, 3600)
        );
        assert_eq!(config.retention.protections().min_remaining, Some(10));
        assert_eq!(config.alerts.webhook(), Some("http://localhost:9999/hook"));
        assert_eq!(config.alerts.timeout(), Duration::from_secs(3));
    }
}
