use crate::integrity::DanglingPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the admin service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Document store configuration
    pub database: DatabaseConfig,
    /// S3 client configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Where each media domain lives in the object store
    pub media: MediaConfig,
    /// Time zone lookup configuration
    #[serde(default)]
    pub timezone: TimezoneConfig,
    /// Referential integrity handling
    #[serde(default)]
    pub integrity: IntegrityConfig,
    /// API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// MongoDB configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// MongoDB connection string
    pub url: String,
    /// Database holding all collections
    #[serde(default = "default_database_name")]
    pub name: String,
    /// Application name reported to the server
    #[serde(default = "default_service_name")]
    pub app_name: String,
    /// Maximum number of pooled connections
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    /// Minimum number of pooled connections
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Server selection timeout in seconds
    #[serde(default = "default_server_selection_timeout_secs")]
    pub server_selection_timeout_secs: u64,
}

/// S3 client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Keys requested per listing page
    #[serde(default = "default_max_keys")]
    pub max_keys: i32,
}

/// Object store location of one media domain
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaLocation {
    pub bucket: String,
    pub prefix: String,
}

/// Media domains checked by reconciliation
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Pictures linked to carriers and vehicles
    pub vehicle_pictures: MediaLocation,
    /// Pictures linked to transit hubs
    pub transit_hub_pictures: MediaLocation,
}

/// Time zone lookup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TimezoneConfig {
    /// Endpoint answering `?latitude=..&longitude=..` with `{"timeZone": ".."}`
    #[serde(default = "default_timezone_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timezone_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegrityConfig {
    /// What to do when a picture references an unknown carrier or vehicle
    #[serde(default)]
    pub dangling_references: DanglingPolicy,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "admin-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_database_name() -> String {
    "flights".to_string()
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_min_pool_size() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_server_selection_timeout_secs() -> u64 {
    10
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_keys() -> i32 {
    1000
}

fn default_timezone_url() -> String {
    "https://timeapi.io/api/TimeZone/coordinate".to_string()
}

fn default_timezone_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "admin-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .set_default("api.host", "0.0.0.0")?
            .set_default("api.port", 8080)?
            // Add config file if present
            .add_source(config::File::with_name("config/admin").required(false))
            .add_source(config::File::with_name("/etc/flights/admin").required(false))
            // Override with environment variables
            // ADMIN__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("ADMIN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        for (domain, location) in [
            ("vehicle_pictures", &self.media.vehicle_pictures),
            ("transit_hub_pictures", &self.media.transit_hub_pictures),
        ] {
            if location.bucket.trim().is_empty() {
                anyhow::bail!("media.{domain}.bucket must not be empty");
            }
            if location.prefix.trim().is_empty() {
                anyhow::bail!("media.{domain}.prefix must not be empty");
            }
        }

        if !(1..=1000).contains(&self.s3.max_keys) {
            anyhow::bail!("s3.max_keys must be between 1 and 1000");
        }

        Ok(())
    }

    /// Get time zone lookup timeout as Duration
    pub fn timezone_timeout(&self) -> Duration {
        Duration::from_secs(self.timezone.timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            max_keys: default_max_keys(),
        }
    }
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            base_url: default_timezone_url(),
            timeout_secs: default_timezone_timeout_secs(),
        }
    }
}
