use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub topledger: TopLedgerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auto_update: AutoUpdateConfig,
    #[serde(default)]
    pub temp: TempConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub newsletter: NewsletterConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

/// A named analytics query: the remote query id plus an optional key that
/// overrides the default `topledger.api_key`.
#[derive(Debug, Deserialize, Clone)]
pub struct QueryRef {
    pub id: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TopLedgerConfig {
    #[serde(default = "default_topledger_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_topledger_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub queries: HashMap<String, QueryRef>,
}

impl Default for TopLedgerConfig {
    fn default() -> Self {
        Self {
            base_url: default_topledger_url(),
            api_key: String::new(),
            timeout_secs: default_topledger_timeout(),
            queries: HashMap::new(),
        }
    }
}

fn default_topledger_url() -> String {
    "https://analytics.topledger.xyz/tl".to_string()
}
fn default_topledger_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub chart_data_ttl_secs: u64,
    #[serde(default = "default_cache_ttl")]
    pub chart_config_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chart_data_ttl_secs: default_cache_ttl(),
            chart_config_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300 // 5 minutes
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Fs,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores. Requests are path-style.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: String::new(),
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            local_dir: default_local_dir(),
        }
    }
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("data/objects")
}

impl StorageConfig {
    /// Fill unset credentials from the standard AWS environment variables.
    pub fn with_aws_env(mut self) -> Self {
        fn env_or(keys: &[&str]) -> Option<String> {
            keys.iter()
                .find_map(|key| std::env::var(key).ok())
                .filter(|v| !v.is_empty())
        }
        if self.region.is_none() {
            self.region = env_or(&["AWS_REGION", "AWS_DEFAULT_REGION"]);
        }
        if self.access_key_id.is_none() {
            self.access_key_id = env_or(&["AWS_ACCESS_KEY_ID"]);
        }
        if self.secret_access_key.is_none() {
            self.secret_access_key = env_or(&["AWS_SECRET_ACCESS_KEY"]);
        }
        if self.session_token.is_none() {
            self.session_token = env_or(&["AWS_SESSION_TOKEN"]);
        }
        if self.bucket.is_empty() {
            self.bucket = env_or(&["S3_BUCKET_NAME", "S3_BUCKET"]).unwrap_or_default();
        }
        self
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/solstate.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AutoUpdateConfig {
    #[serde(default = "default_auto_update_enabled")]
    pub enabled: bool,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_update_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_update_command")]
    pub command: String,
    #[serde(default = "default_update_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// The child process is killed when it runs longer than this.
    #[serde(default = "default_update_timeout")]
    pub timeout_secs: u64,
}

impl Default for AutoUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: default_auto_update_enabled(),
            initial_delay_secs: default_initial_delay(),
            interval_secs: default_update_interval(),
            command: default_update_command(),
            args: default_update_args(),
            working_dir: None,
            timeout_secs: default_update_timeout(),
        }
    }
}

fn default_auto_update_enabled() -> bool {
    true
}
fn default_initial_delay() -> u64 {
    30
}
fn default_update_interval() -> u64 {
    600 // 10 minutes
}
fn default_update_command() -> String {
    "node".to_string()
}
fn default_update_args() -> Vec<String> {
    vec!["scripts/fetch-chart-data.js".to_string()]
}
fn default_update_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct TempConfig {
    #[serde(default = "default_temp_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub gzip: bool,
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            dir: default_temp_dir(),
            gzip: false,
        }
    }
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub admin_password: String,
    #[serde(default)]
    pub internal_password: String,
    #[serde(default)]
    pub status_api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsletterConfig {
    #[serde(default)]
    pub brevo_api_key: String,
    #[serde(default)]
    pub list_id: Option<u64>,
    #[serde(default = "default_brevo_url")]
    pub api_url: String,
}

impl Default for NewsletterConfig {
    fn default() -> Self {
        Self {
            brevo_api_key: String::new(),
            list_id: None,
            api_url: default_brevo_url(),
        }
    }
}

fn default_brevo_url() -> String {
    "https://api.brevo.com/v3/contacts".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub ga_tracking_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_per_second")]
    pub per_second: u64,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            per_second: default_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}
fn default_per_second() -> u64 {
    2
}
fn default_burst_size() -> u32 {
    20
}

impl AppConfig {
    /// Validate settings that would otherwise only fail at first use.
    pub fn validate(&self) -> Result<(), String> {
        if self.storage.backend == StorageBackend::S3 {
            if self.storage.bucket.is_empty() {
                return Err("storage.bucket must be set for the s3 backend. \
                     Set it in config.toml or via SOLSTATE__STORAGE__BUCKET / S3_BUCKET_NAME."
                    .to_string());
            }
            if self.storage.access_key_id.is_none() || self.storage.secret_access_key.is_none() {
                return Err("S3 credentials missing. Set AWS_ACCESS_KEY_ID and \
                     AWS_SECRET_ACCESS_KEY or the storage.* config keys."
                    .to_string());
            }
        }
        if self.auto_update.interval_secs == 0 {
            return Err("auto_update.interval_secs must be greater than zero".to_string());
        }
        if self.topledger.timeout_secs == 0 {
            return Err("topledger.timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // SOLSTATE__SERVER__PORT=8080, SOLSTATE__STORAGE__BUCKET=..., etc.
        builder = builder.add_source(
            Environment::with_prefix("SOLSTATE")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        config.storage = config.storage.with_aws_env();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_dashboard_timings() {
        let config = AppConfig::default();
        assert_eq!(config.cache.chart_data_ttl_secs, 300);
        assert_eq!(config.cache.chart_config_ttl_secs, 300);
        assert_eq!(config.auto_update.initial_delay_secs, 30);
        assert_eq!(config.auto_update.interval_secs, 600);
    }

    #[test]
    fn test_validate_rejects_s3_without_bucket() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_fs_backend() {
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Fs;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Fs;
        config.auto_update.interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
