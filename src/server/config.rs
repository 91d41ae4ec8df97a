use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub database_url: String,
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,
    /// Relay that executes shell commands on hypervisor hosts.
    pub command_endpoint: String,

    #[serde(default = "default_general_rules_dir")]
    pub general_rules_dir: String,
    #[serde(default = "default_special_rules_dir")]
    pub special_rules_dir: String,
    #[serde(default = "default_enabled_rules_dir")]
    pub enabled_rules_dir: String,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
    #[serde(default = "default_scrape_target")]
    pub scrape_target: String,

    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    #[serde(default = "default_reload_timeout_secs")]
    pub reload_timeout_secs: u64,
    #[serde(default = "default_target_cache_ttl_secs")]
    pub target_cache_ttl_secs: u64,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    listen_addr: Option<String>,
    database_url: Option<String>,
    prometheus_url: Option<String>,
    command_endpoint: Option<String>,
    general_rules_dir: Option<String>,
    special_rules_dir: Option<String>,
    enabled_rules_dir: Option<String>,
    manifest_path: Option<String>,
    scrape_target: Option<String>,
    query_timeout_secs: Option<u64>,
    dispatch_timeout_secs: Option<u64>,
    notify_timeout_secs: Option<u64>,
    reload_timeout_secs: Option<u64>,
    target_cache_ttl_secs: Option<u64>,
    log_dir: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_prometheus_url() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_general_rules_dir() -> String {
    "/etc/prometheus/rules_general".to_string()
}

fn default_special_rules_dir() -> String {
    "/etc/prometheus/rules_special".to_string()
}

fn default_enabled_rules_dir() -> String {
    "/etc/prometheus/rules_enabled".to_string()
}

fn default_manifest_path() -> String {
    "/etc/prometheus/lists/matched_vms.json".to_string()
}

fn default_scrape_target() -> String {
    "localhost:9090".to_string()
}

fn default_query_timeout_secs() -> u64 {
    5
}

fn default_dispatch_timeout_secs() -> u64 {
    10
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_reload_timeout_secs() -> u64 {
    10
}

fn default_target_cache_ttl_secs() -> u64 {
    60
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, String> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("{key} has an invalid value: {raw}")),
        None => Ok(None),
    }
}

impl PartialServerConfig {
    fn from_env() -> Result<Self, String> {
        Ok(Self {
            listen_addr: env_string("LISTEN_ADDR"),
            database_url: env_string("DATABASE_URL"),
            prometheus_url: env_string("PROMETHEUS_URL"),
            command_endpoint: env_string("COMMAND_ENDPOINT"),
            general_rules_dir: env_string("GENERAL_RULES_DIR"),
            special_rules_dir: env_string("SPECIAL_RULES_DIR"),
            enabled_rules_dir: env_string("ENABLED_RULES_DIR"),
            manifest_path: env_string("MANIFEST_PATH"),
            scrape_target: env_string("SCRAPE_TARGET"),
            query_timeout_secs: env_parse("QUERY_TIMEOUT_SECS")?,
            dispatch_timeout_secs: env_parse("DISPATCH_TIMEOUT_SECS")?,
            notify_timeout_secs: env_parse("NOTIFY_TIMEOUT_SECS")?,
            reload_timeout_secs: env_parse("RELOAD_TIMEOUT_SECS")?,
            target_cache_ttl_secs: env_parse("TARGET_CACHE_TTL_SECS")?,
            log_dir: env_string("LOG_DIR"),
        })
    }
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let path = Path::new(path_str);
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            }
            _ => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config = PartialServerConfig::from_env()?;

        // 3. Merge: environment overrides file
        Self::merge(env_config, file_config)
    }

    fn merge(env_config: PartialServerConfig, file_config: PartialServerConfig) -> Result<Self, String> {
        Ok(ServerConfig {
            listen_addr: env_config.listen_addr.or(file_config.listen_addr)
                .unwrap_or_else(default_listen_addr),
            database_url: env_config.database_url.or(file_config.database_url)
                .ok_or("DATABASE_URL is required")?,
            prometheus_url: env_config.prometheus_url.or(file_config.prometheus_url)
                .unwrap_or_else(default_prometheus_url),
            command_endpoint: env_config.command_endpoint.or(file_config.command_endpoint)
                .ok_or("COMMAND_ENDPOINT is required")?,
            general_rules_dir: env_config.general_rules_dir.or(file_config.general_rules_dir)
                .unwrap_or_else(default_general_rules_dir),
            special_rules_dir: env_config.special_rules_dir.or(file_config.special_rules_dir)
                .unwrap_or_else(default_special_rules_dir),
            enabled_rules_dir: env_config.enabled_rules_dir.or(file_config.enabled_rules_dir)
                .unwrap_or_else(default_enabled_rules_dir),
            manifest_path: env_config.manifest_path.or(file_config.manifest_path)
                .unwrap_or_else(default_manifest_path),
            scrape_target: env_config.scrape_target.or(file_config.scrape_target)
                .unwrap_or_else(default_scrape_target),
            query_timeout_secs: env_config.query_timeout_secs.or(file_config.query_timeout_secs)
                .unwrap_or_else(default_query_timeout_secs),
            dispatch_timeout_secs: env_config.dispatch_timeout_secs.or(file_config.dispatch_timeout_secs)
                .unwrap_or_else(default_dispatch_timeout_secs),
            notify_timeout_secs: env_config.notify_timeout_secs.or(file_config.notify_timeout_secs)
                .unwrap_or_else(default_notify_timeout_secs),
            reload_timeout_secs: env_config.reload_timeout_secs.or(file_config.reload_timeout_secs)
                .unwrap_or_else(default_reload_timeout_secs),
            target_cache_ttl_secs: env_config.target_cache_ttl_secs.or(file_config.target_cache_ttl_secs)
                .unwrap_or_else(default_target_cache_ttl_secs),
            log_dir: env_config.log_dir.or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }

    pub fn target_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.target_cache_ttl_secs)
    }
}
