use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Public address of this host, used to build the mirror URLs shown to
    /// operators (e.g. "http://hub.internal")
    pub server_addr: String,
    /// Redis connection URL. Empty = in-memory store (state is lost on restart).
    #[serde(default)]
    pub redis_url: String,
    /// Chat platform credentials
    pub ding: DingConfig,
    /// Admin mobile for stuck alerts and debug intel
    pub ding_admin_mob: String,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Optional directory-sync uploader running alongside the hub
    #[serde(default)]
    pub uploader: Option<UploaderConfig>,
}

/// Chat platform (DingTalk work messages) credentials
#[derive(Debug, Clone, Deserialize)]
pub struct DingConfig {
    pub agent_id: i64,
    pub key: String,
    pub secret: String,
    /// API base, overridable for staging
    #[serde(default = "default_ding_api_url")]
    pub api_url: String,
}

fn default_ding_api_url() -> String {
    "https://oapi.dingtalk.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    /// Main HTTP port (all §6 endpoints)
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    /// UDP port the strategy fleet connects to
    #[serde(default = "default_fleet_port")]
    pub fleet_port: u16,
    /// Secret for the strategy-interaction chat bot webhook
    #[serde(default)]
    pub fleet_bot_secret: String,
    /// Secret for the message-assistant chat bot webhook
    #[serde(default)]
    pub intel_bot_secret: String,
    /// Static server port for the uploaded file tree
    #[serde(default = "default_file_port")]
    pub file_server_port: u16,
    /// Static server port for the notify record tree
    #[serde(default = "default_record_port")]
    pub notify_record_port: u16,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            web_port: default_web_port(),
            fleet_port: default_fleet_port(),
            fleet_bot_secret: String::new(),
            intel_bot_secret: String::new(),
            file_server_port: default_file_port(),
            notify_record_port: default_record_port(),
        }
    }
}

fn default_web_port() -> u16 {
    8200
}

fn default_fleet_port() -> u16 {
    8201
}

fn default_file_port() -> u16 {
    8202
}

fn default_record_port() -> u16 {
    8203
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Directory-sync uploader settings (client side of the file mirror)
#[derive(Debug, Clone, Deserialize)]
pub struct UploaderConfig {
    /// Base URL of the hub the files are pushed to
    pub url: String,
    /// Local directory to scan (flat, no subdirectories)
    pub root: String,
    pub main_folder: String,
    #[serde(default)]
    pub sub_folder: String,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

fn default_scan_interval() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from either a config directory or a single TOML file
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_path = config_dir.as_ref();

        let mut builder = Config::builder()
            .set_default("server_addr", "http://127.0.0.1")?
            .set_default("redis_url", "")?
            .set_default("ding_admin_mob", "")?
            .set_default("logging.level", "info")?;

        if config_path.is_file() {
            builder = builder.add_source(File::from(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::from(config_path.join("default.toml")).required(false))
                .add_source(
                    File::from(config_path.join(
                        std::env::var("QUANTHUB_ENV")
                            .unwrap_or_else(|_| "development".to_string()),
                    ))
                    .required(false),
                );
        }

        builder = builder.add_source(
            // Override with environment variables (QUANTHUB_SERVICES__WEB_PORT, etc.)
            Environment::with_prefix("QUANTHUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// URL of the notify record mirror shown inside notifications
    pub fn notify_mirror_url(&self) -> String {
        format!("{}:{}", self.server_addr, self.services.notify_record_port)
    }

    /// URL of the uploaded file mirror
    pub fn file_mirror_url(&self) -> String {
        format!("{}:{}", self.server_addr, self.services.file_server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_urls() {
        let cfg = AppConfig {
            server_addr: "http://hub.internal".to_string(),
            redis_url: String::new(),
            ding: DingConfig {
                agent_id: 1,
                key: "k".to_string(),
                secret: "s".to_string(),
                api_url: default_ding_api_url(),
            },
            ding_admin_mob: "1380000000000".to_string(),
            services: ServicesConfig::default(),
            logging: LoggingConfig::default(),
            uploader: None,
        };
        assert_eq!(cfg.notify_mirror_url(), "http://hub.internal:8203");
        assert_eq!(cfg.file_mirror_url(), "http://hub.internal:8202");
    }

    #[test]
    fn test_defaults() {
        let services = ServicesConfig::default();
        assert_eq!(services.web_port, 8200);
        assert_eq!(services.fleet_port, 8201);
    }
}
