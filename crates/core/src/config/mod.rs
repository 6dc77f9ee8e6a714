//! Application configuration with layered loading.
//!
//! Settings are merged from, lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. TOML config file (if TRAWL_CONFIG_FILE set)
//! 3. Environment variables (TRAWL_*, nested sections split on `__`,
//!    e.g. `TRAWL_STORAGE__KIND=redis`)

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP endpoint binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// User-Agent string sent by the base fetcher.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Base fetcher request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum body bytes kept per fetched document.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Outbound proxy for the base fetcher, e.g. `http://127.0.0.1:3128`.
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub splash: SplashConfig,

    #[serde(default)]
    pub chrome: ChromeConfig,

    #[serde(default)]
    pub robots: RobotsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Count requests per identity in the active store.
    #[serde(default = "default_true")]
    pub stats_enabled: bool,

    /// Publish freshly fetched cacheable pages to a queue.
    #[serde(default)]
    pub queue: Option<QueueConfig>,
}

/// Remote rendering proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplashConfig {
    /// `host:port` of the rendering service.
    #[serde(default = "default_splash_host")]
    pub host: String,

    /// Render timeout passed to the service, in seconds.
    #[serde(default = "default_splash_timeout")]
    pub timeout_secs: u64,

    /// Per-resource timeout passed to the service, in seconds.
    #[serde(default = "default_resource_timeout")]
    pub resource_timeout_secs: u64,

    /// Seconds to wait after page load when the request does not say.
    #[serde(default = "default_wait")]
    pub wait_secs: f64,
}

/// Headless browser settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChromeConfig {
    /// Serve `chrome` requests. Off by default since it needs a browser.
    #[serde(default)]
    pub enabled: bool,

    /// DevTools websocket of an already running browser. When unset a
    /// local browser is launched.
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Browser executable used when launching locally.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Deadline for DOMContentLoaded after navigation, in milliseconds.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// URL substrings whose subresource requests are aborted.
    #[serde(default)]
    pub excluded_resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rule group evaluated in each robots.txt.
    #[serde(default = "default_robots_agent")]
    pub agent: String,
}

/// Which persistence engine backs the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    #[serde(alias = "diskv")]
    Disk,
    S3,
    Redis,
    #[serde(alias = "mongodb")]
    Mongo,
    Cassandra,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Disk => "disk",
            StorageType::S3 => "s3",
            StorageType::Redis => "redis",
            StorageType::Mongo => "mongo",
            StorageType::Cassandra => "cassandra",
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage engine selection and per-engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Read-through caching of fetched responses.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub kind: StorageType,

    /// Fixed lifetime for stores that judge freshness by modification
    /// time (disk, S3), in seconds.
    #[serde(default = "default_storage_expire")]
    pub expire_secs: u64,

    #[serde(default = "default_disk_dir")]
    pub disk_dir: PathBuf,

    /// Entries held by the disk store's in-memory read cache.
    #[serde(default = "default_disk_cache_entries")]
    pub disk_cache_entries: usize,

    #[serde(default)]
    pub s3_bucket: Option<String>,

    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub s3_endpoint: Option<String>,

    #[serde(default)]
    pub s3_region: Option<String>,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_pool_size")]
    pub redis_pool_size: usize,

    #[serde(default = "default_mongo_uri")]
    pub mongo_uri: String,

    #[serde(default = "default_database")]
    pub mongo_database: String,

    #[serde(default = "default_cassandra_nodes")]
    pub cassandra_nodes: Vec<String>,

    #[serde(default = "default_database")]
    pub cassandra_keyspace: String,
}

/// Queue receiving freshly fetched pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub url: String,

    #[serde(default)]
    pub region: Option<String>,
}

fn default_listen() -> String {
    "127.0.0.1:8000".into()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; DataflowKitBot/1.0; +https://dataflowkit.com)".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_true() -> bool {
    true
}

fn default_splash_host() -> String {
    "127.0.0.1:8050".into()
}

fn default_splash_timeout() -> u64 {
    20
}

fn default_resource_timeout() -> u64 {
    30
}

fn default_wait() -> f64 {
    0.5
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_robots_agent() -> String {
    "DataflowKitBot".into()
}

fn default_storage_expire() -> u64 {
    86_400
}

fn default_disk_dir() -> PathBuf {
    PathBuf::from("./diskv")
}

fn default_disk_cache_entries() -> usize {
    1024
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_pool_size() -> usize {
    16
}

fn default_mongo_uri() -> String {
    "mongodb://127.0.0.1:27017".into()
}

fn default_database() -> String {
    "trawl".into()
}

fn default_cassandra_nodes() -> Vec<String> {
    vec!["127.0.0.1:9042".into()]
}

impl Default for SplashConfig {
    fn default() -> Self {
        Self {
            host: default_splash_host(),
            timeout_secs: default_splash_timeout(),
            resource_timeout_secs: default_resource_timeout(),
            wait_secs: default_wait(),
        }
    }
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self { enabled: true, agent: default_robots_agent() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: StorageType::default(),
            expire_secs: default_storage_expire(),
            disk_dir: default_disk_dir(),
            disk_cache_entries: default_disk_cache_entries(),
            s3_bucket: None,
            s3_endpoint: None,
            s3_region: None,
            redis_url: default_redis_url(),
            redis_pool_size: default_pool_size(),
            mongo_uri: default_mongo_uri(),
            mongo_database: default_database(),
            cassandra_nodes: default_cassandra_nodes(),
            cassandra_keyspace: default_database(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            proxy: None,
            splash: SplashConfig::default(),
            chrome: ChromeConfig { navigation_timeout_ms: default_navigation_timeout_ms(), ..Default::default() },
            robots: RobotsConfig::default(),
            storage: StorageConfig::default(),
            stats_enabled: true,
            queue: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed,
    /// or validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("TRAWL_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("TRAWL_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

impl SplashConfig {
    /// Client-side deadline: the render timeout plus slack for transfer.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs + 10)
    }
}

impl ChromeConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

impl StorageConfig {
    pub fn expire(&self) -> Duration {
        Duration::from_secs(self.expire_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.listen, "127.0.0.1:8000");
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.splash.host, "127.0.0.1:8050");
        assert_eq!(config.splash.timeout_secs, 20);
        assert_eq!(config.splash.resource_timeout_secs, 30);
        assert_eq!(config.splash.wait_secs, 0.5);
        assert_eq!(config.chrome.navigation_timeout_ms, 30_000);
        assert_eq!(config.robots.agent, "DataflowKitBot");
        assert!(config.robots.enabled);
        assert_eq!(config.storage.kind, StorageType::Disk);
        assert_eq!(config.storage.expire_secs, 86_400);
        assert!(config.stats_enabled);
        assert!(config.queue.is_none());
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
        assert_eq!(config.splash.client_timeout(), Duration::from_secs(30));
        assert_eq!(config.chrome.navigation_timeout(), Duration::from_secs(30));
        assert_eq!(config.storage.expire(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_storage_type_aliases() {
        let kind: StorageType = serde_json::from_str(r#""diskv""#).unwrap();
        assert_eq!(kind, StorageType::Disk);
        let kind: StorageType = serde_json::from_str(r#""mongodb""#).unwrap();
        assert_eq!(kind, StorageType::Mongo);
        let kind: StorageType = serde_json::from_str(r#""cassandra""#).unwrap();
        assert_eq!(kind.to_string(), "cassandra");
    }

    #[test]
    fn test_load_from_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TRAWL_TIMEOUT_MS", "5000");
            jail.set_env("TRAWL_STORAGE__KIND", "redis");
            jail.set_env("TRAWL_SPLASH__HOST", "splash:8050");
            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.timeout_ms, 5000);
            assert_eq!(config.storage.kind, StorageType::Redis);
            assert_eq!(config.splash.host, "splash:8050");
            Ok(())
        });
    }

    #[test]
    fn test_load_from_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "trawl.toml",
                r#"
                listen = "0.0.0.0:9000"

                [storage]
                kind = "cassandra"
                cassandra_nodes = ["db:9042"]
                "#,
            )?;
            jail.set_env("TRAWL_CONFIG_FILE", "trawl.toml");
            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.listen, "0.0.0.0:9000");
            assert_eq!(config.storage.kind, StorageType::Cassandra);
            assert_eq!(config.storage.cassandra_nodes, vec!["db:9042".to_string()]);
            assert_eq!(config.storage.expire_secs, 86_400);
            Ok(())
        });
    }
}
