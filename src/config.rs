use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::ddl::vars::{
    MAX_DDL_REORG_BATCH_SIZE, MAX_DDL_REORG_WORKER_COUNT, MIN_DDL_REORG_BATCH_SIZE,
};
use crate::errors::{DdlError, Result};
use crate::retry::RetryConfig;

/// Environment variable prefix, e.g. `DDL_REORG__WORKER_CNT=8`.
pub const ENV_PREFIX: &str = "DDL";

/// Main configuration structure for the DDL engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Job queue and worker settings
    #[serde(default)]
    pub ddl: DdlConfig,

    /// Backfill tunables
    #[serde(default)]
    pub reorg: ReorgConfig,

    #[serde(default)]
    pub autoid: AutoIdConfig,

    #[serde(default)]
    pub infoschema: InfoSchemaConfig,

    /// Defaults applied to new sessions
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdlConfig {
    /// Number of job workers started by each domain
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// How long a worker owns a job after touching it
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// Idle poll interval of the worker loop
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Upper bound a submitter waits for its job to finish
    #[serde(default = "default_job_wait_timeout_ms")]
    pub job_wait_timeout_ms: u64,

    /// Write-conflict retries inside one metadata transaction
    #[serde(default = "default_txn_retry_limit")]
    pub txn_retry_limit: u32,

    #[serde(default = "default_retry_max_retries")]
    pub retry_max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorgConfig {
    #[serde(default = "default_reorg_worker_cnt")]
    pub worker_cnt: i32,

    #[serde(default = "default_reorg_batch_size")]
    pub batch_size: i32,

    /// Failures tolerated per job before it is rolled back
    #[serde(default = "default_error_count_limit")]
    pub error_count_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoIdConfig {
    /// Size of the ID batch a table allocator reserves per metadata round trip
    #[serde(default = "default_autoid_step")]
    pub step: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoSchemaConfig {
    /// Number of schema versions kept for snapshot reads
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_charset")]
    pub character_set_server: String,

    #[serde(default = "default_collation")]
    pub collation_server: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log directory for the rolling file sink (optional)
    #[serde(default)]
    pub file: Option<String>,

    /// Enable console output
    #[serde(default = "default_console_output")]
    pub console: bool,
}

impl Default for DdlConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            lease_ms: default_lease_ms(),
            tick_ms: default_tick_ms(),
            job_wait_timeout_ms: default_job_wait_timeout_ms(),
            txn_retry_limit: default_txn_retry_limit(),
            retry_max_retries: default_retry_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for ReorgConfig {
    fn default() -> Self {
        Self {
            worker_cnt: default_reorg_worker_cnt(),
            batch_size: default_reorg_batch_size(),
            error_count_limit: default_error_count_limit(),
        }
    }
}

impl Default for AutoIdConfig {
    fn default() -> Self {
        Self {
            step: default_autoid_step(),
        }
    }
}

impl Default for InfoSchemaConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            character_set_server: default_charset(),
            collation_server: default_collation(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            console: default_console_output(),
        }
    }
}

// Default value functions
fn default_worker_count() -> usize { 1 }
fn default_lease_ms() -> u64 { 10_000 }
fn default_tick_ms() -> u64 { 20 }
fn default_job_wait_timeout_ms() -> u64 { 30_000 }
fn default_txn_retry_limit() -> u32 { 10 }
fn default_retry_max_retries() -> u32 { 5 }
fn default_retry_base_delay_ms() -> u64 { 10 }
fn default_retry_max_delay_ms() -> u64 { 1_000 }
fn default_reorg_worker_cnt() -> i32 { 4 }
fn default_reorg_batch_size() -> i32 { 256 }
fn default_error_count_limit() -> i64 { 512 }
fn default_autoid_step() -> i64 { 30_000 }
fn default_cache_capacity() -> usize { 16 }
fn default_charset() -> String { "utf8mb4".to_string() }
fn default_collation() -> String { "utf8mb4_bin".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_console_output() -> bool { true }

impl DdlConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn job_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.job_wait_timeout_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry_max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_multiplier: 2.0,
        }
    }
}

impl AppConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path.extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("json");
        let content = std::fs::read_to_string(path)
            .map_err(|e| DdlError::Configuration(format!("Failed to read config file: {}", e)))?;

        let config = match extension {
            "json" => serde_json::from_str(&content)
                .map_err(|e| DdlError::Configuration(format!("Failed to parse JSON config: {}", e)))?,
            "toml" => toml::from_str(&content)
                .map_err(|e| DdlError::Configuration(format!("Failed to parse TOML config: {}", e)))?,
            _ => return Err(DdlError::Configuration(format!("Unsupported config file format: {}", extension))),
        };

        Ok(config)
    }

    /// Load defaults, then the optional file, then `DDL_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(DdlError::Configuration(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let extension = path.extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("json");

        let content = match extension {
            "json" => serde_json::to_string_pretty(self)
                .map_err(|e| DdlError::Configuration(format!("Failed to serialize config: {}", e)))?,
            "toml" => toml::to_string_pretty(self)
                .map_err(|e| DdlError::Configuration(format!("Failed to serialize config: {}", e)))?,
            _ => return Err(DdlError::Configuration(format!("Unsupported config file format: {}", extension))),
        };

        std::fs::write(path, content)
            .map_err(|e| DdlError::Configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ddl.worker_count == 0 {
            return Err(DdlError::Configuration("DDL worker count must be greater than 0".to_string()));
        }
        if self.ddl.lease_ms == 0 || self.ddl.tick_ms == 0 {
            return Err(DdlError::Configuration("DDL lease and tick must be greater than 0".to_string()));
        }
        if !(1..=MAX_DDL_REORG_WORKER_COUNT).contains(&self.reorg.worker_cnt) {
            return Err(DdlError::Configuration(format!(
                "reorg worker_cnt must be within 1..={}",
                MAX_DDL_REORG_WORKER_COUNT
            )));
        }
        if !(MIN_DDL_REORG_BATCH_SIZE..=MAX_DDL_REORG_BATCH_SIZE).contains(&self.reorg.batch_size) {
            return Err(DdlError::Configuration(format!(
                "reorg batch_size must be within {}..={}",
                MIN_DDL_REORG_BATCH_SIZE, MAX_DDL_REORG_BATCH_SIZE
            )));
        }
        if self.reorg.error_count_limit < 0 {
            return Err(DdlError::Configuration("error_count_limit cannot be negative".to_string()));
        }
        if self.autoid.step <= 0 {
            return Err(DdlError::Configuration("autoid step must be greater than 0".to_string()));
        }
        if self.infoschema.cache_capacity == 0 {
            return Err(DdlError::Configuration("infoschema cache capacity must be greater than 0".to_string()));
        }
        crate::charset::validate_charset_collation(
            &self.session.character_set_server,
            &self.session.collation_server,
        )
        .map_err(|e| DdlError::Configuration(e.to_string()))?;
        Ok(())
    }
}

/// Configuration builder for programmatic configuration
#[derive(Default)]
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.ddl.worker_count = count;
        self
    }

    pub fn lease_ms(mut self, lease_ms: u64) -> Self {
        self.config.ddl.lease_ms = lease_ms;
        self
    }

    pub fn tick_ms(mut self, tick_ms: u64) -> Self {
        self.config.ddl.tick_ms = tick_ms;
        self
    }

    pub fn job_wait_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.ddl.job_wait_timeout_ms = timeout_ms;
        self
    }

    pub fn autoid_step(mut self, step: i64) -> Self {
        self.config.autoid.step = step;
        self
    }

    pub fn reorg_worker_cnt(mut self, count: i32) -> Self {
        self.config.reorg.worker_cnt = count;
        self
    }

    pub fn reorg_batch_size(mut self, size: i32) -> Self {
        self.config.reorg.batch_size = size;
        self
    }

    pub fn error_count_limit(mut self, limit: i64) -> Self {
        self.config.reorg.error_count_limit = limit;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.infoschema.cache_capacity = capacity;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.autoid.step, 30_000);
        assert_eq!(config.reorg.worker_cnt, 4);
        assert_eq!(config.reorg.batch_size, 256);
        assert_eq!(config.reorg.error_count_limit, 512);
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ddl.toml");
        let config = ConfigBuilder::new().autoid_step(5000).reorg_worker_cnt(8).build();
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.autoid.step, 5000);
        assert_eq!(loaded.reorg.worker_cnt, 8);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ddl.yaml");
        assert!(AppConfig::default().save_to_file(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = ConfigBuilder::new().reorg_batch_size(1).build();
        assert!(config.validate().is_err());
        let config = ConfigBuilder::new().autoid_step(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_layered_load_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ddl.json");
        ConfigBuilder::new().autoid_step(5000).build().save_to_file(&path).unwrap();

        unsafe { std::env::set_var("DDL_REORG__WORKER_CNT", "16") };
        let loaded = AppConfig::load(Some(&path));
        unsafe { std::env::remove_var("DDL_REORG__WORKER_CNT") };

        let loaded = loaded.unwrap();
        assert_eq!(loaded.autoid.step, 5000);
        assert_eq!(loaded.reorg.worker_cnt, 16);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
