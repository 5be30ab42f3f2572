//! Sync configuration.
//!
//! Configuration can be loaded from:
//! - a TOML file (`DESPA_SYNC_CONFIG`, else `./despa-sync.toml`)
//! - environment variables (`DESPA_SYNC_*` prefixed)
//!
//! # Example
//!
//! ```rust,no_run
//! use despa_sync::config::SyncConfig;
//!
//! // Load from the configured path or fall back to env vars
//! let config = SyncConfig::load().expect("Failed to load config");
//!
//! // Or explicitly from a file
//! let config = SyncConfig::from_file(std::path::Path::new("despa-sync.toml")).expect("Failed to load");
//!
//! // Or from environment variables
//! let config = SyncConfig::from_env();
//! ```

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use despa_core::defaults;
use despa_core::EventType;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for despa_core::Error {
    fn from(e: ConfigError) -> Self {
        despa_core::Error::Config(e.to_string())
    }
}

/// Tunables for the registry and its consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Events older than this many milliseconds are never delivered.
    pub freshness_window_ms: i64,
    /// Visible history kept per consumer.
    pub history_capacity: usize,
    /// Dedup set bound per consumer; `None` is unbounded.
    pub dedup_capacity: Option<usize>,
    /// Types connected when a caller requests none.
    pub default_event_types: Vec<EventType>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: defaults::FRESHNESS_WINDOW_MS,
            history_capacity: defaults::HISTORY_CAPACITY,
            dedup_capacity: defaults::DEDUP_CAPACITY,
            default_event_types: EventType::DEFAULTS.to_vec(),
        }
    }
}

impl SyncConfig {
    /// Load from the file named by `DESPA_SYNC_CONFIG` (or `./despa-sync.toml`)
    /// when it exists, otherwise from environment variables.
    pub fn load() -> ConfigResult<Self> {
        let path = Self::default_config_path();

        if path.exists() {
            info!("Loading sync config from: {}", path.display());
            Self::from_file(&path)
        } else {
            debug!(
                "Config file not found at {}, using environment variables",
                path.display()
            );
            let config = Self::from_env();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn default_config_path() -> PathBuf {
        env::var(defaults::CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(defaults::CONFIG_FILE_NAME))
    }

    /// Load configuration from a TOML file with a `[sync]` table.
    ///
    /// ```toml
    /// [sync]
    /// freshness_window_ms = 5000
    /// history_capacity = 50
    /// default_event_types = ["process", "client", "notification"]
    /// ```
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        #[derive(Deserialize)]
        struct TomlRoot {
            #[serde(default)]
            sync: SyncConfig,
        }

        let root: TomlRoot = toml::from_str(content)?;
        root.sync.validate()?;
        Ok(root.sync)
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DESPA_SYNC_FRESHNESS_MS` | `5000` | Freshness window |
    /// | `DESPA_SYNC_HISTORY_CAPACITY` | `50` | Visible history per consumer |
    /// | `DESPA_SYNC_DEDUP_CAPACITY` | unset | Dedup bound per consumer |
    /// | `DESPA_SYNC_EVENT_TYPES` | `process,client,notification` | Default types |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let base = Self::default();

        let freshness_window_ms = env::var("DESPA_SYNC_FRESHNESS_MS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(base.freshness_window_ms);

        let history_capacity = env::var("DESPA_SYNC_HISTORY_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(base.history_capacity)
            .max(1);

        let dedup_capacity = env::var("DESPA_SYNC_DEDUP_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .or(base.dedup_capacity);

        let default_event_types = match env::var("DESPA_SYNC_EVENT_TYPES") {
            Ok(raw) => Self::parse_event_types(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Invalid DESPA_SYNC_EVENT_TYPES, using defaults");
                base.default_event_types.clone()
            }),
            Err(_) => base.default_event_types.clone(),
        };

        Self {
            freshness_window_ms,
            history_capacity,
            dedup_capacity,
            default_event_types,
        }
    }

    fn parse_event_types(raw: &str) -> Option<Vec<EventType>> {
        let mut types = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let event_type = part.parse::<EventType>().ok()?;
            if !types.contains(&event_type) {
                types.push(event_type);
            }
        }
        (!types.is_empty()).then_some(types)
    }

    pub fn with_freshness_window_ms(mut self, ms: i64) -> Self {
        self.freshness_window_ms = ms;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_dedup_capacity(mut self, capacity: Option<usize>) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    pub fn with_default_event_types(mut self, types: Vec<EventType>) -> Self {
        self.default_event_types = types;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.freshness_window_ms <= 0 {
            return Err(ConfigError::Validation(format!(
                "freshness_window_ms must be positive, got: {}",
                self.freshness_window_ms
            )));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Validation(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.dedup_capacity == Some(0) {
            return Err(ConfigError::Validation(
                "dedup_capacity must be at least 1 when set".to_string(),
            ));
        }
        if self.default_event_types.is_empty() {
            return Err(ConfigError::Validation(
                "default_event_types cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.freshness_window_ms, 5_000);
        assert_eq!(config.history_capacity, 50);
        assert!(config.dedup_capacity.is_none());
        assert_eq!(
            config.default_event_types,
            vec![
                EventType::Process,
                EventType::Client,
                EventType::Notification
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str_partial_table_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            [sync]
            history_capacity = 20
            default_event_types = ["process"]
            "#,
        )
        .unwrap();
        assert_eq!(config.history_capacity, 20);
        assert_eq!(config.freshness_window_ms, 5_000);
        assert_eq!(config.default_event_types, vec![EventType::Process]);
    }

    #[test]
    fn test_from_toml_str_missing_table_is_default() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_from_toml_str_rejects_unknown_event_type() {
        let result = SyncConfig::from_toml_str(
            r#"
            [sync]
            default_event_types = ["payment"]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_from_toml_str_validates() {
        let result = SyncConfig::from_toml_str(
            r#"
            [sync]
            history_capacity = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nfreshness_window_ms = 8000\ndedup_capacity = 500").unwrap();

        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.freshness_window_ms, 8_000);
        assert_eq!(config.dedup_capacity, Some(500));
    }

    #[test]
    fn test_from_file_missing_is_read_error() {
        let result = SyncConfig::from_file(Path::new("/nonexistent/despa-sync.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_parse_event_types() {
        assert_eq!(
            SyncConfig::parse_event_types("process, client,process"),
            Some(vec![EventType::Process, EventType::Client])
        );
        assert_eq!(SyncConfig::parse_event_types("process,bogus"), None);
        assert_eq!(SyncConfig::parse_event_types(" , "), None);
    }

    #[test]
    fn test_validation_errors() {
        assert!(SyncConfig::default()
            .with_freshness_window_ms(0)
            .validate()
            .is_err());
        assert!(SyncConfig::default()
            .with_dedup_capacity(Some(0))
            .validate()
            .is_err());
        assert!(SyncConfig::default()
            .with_default_event_types(vec![])
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_error_into_core_error() {
        let err: despa_core::Error = ConfigError::Validation("bad".to_string()).into();
        assert_eq!(err.to_string(), "Configuration error: Validation error: bad");
    }
}
