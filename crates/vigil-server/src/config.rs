use anyhow::{bail, Context};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_core::CameraConfig;
use vigil_realtime::ConnectionSettings;

/// 未指定 `--config` 时尝试读取的文件（不存在则全部使用默认值）
pub const DEFAULT_CONFIG_FILE: &str = "vigil.toml";

/// 环境变量前缀，层级用 `__` 分隔，如 `VIGIL_SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "VIGIL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 密钥，必须配置
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_expiration_hours")]
    pub expiration_hours: i64,
}

fn default_expiration_hours() -> i64 {
    24
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            expiration_hours: default_expiration_hours(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    #[serde(default = "default_statistics_interval_secs")]
    pub statistics_interval_secs: u64,
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// `[realtime.connection]`
    #[serde(default)]
    pub connection: ConnectionSettings,
}

fn default_statistics_interval_secs() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            statistics_interval_secs: default_statistics_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            connection: ConnectionSettings::default(),
        }
    }
}

impl RealtimeConfig {
    pub fn statistics_interval(&self) -> Duration {
        Duration::from_secs(self.statistics_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordingConfig {
    /// 录像与元数据根目录
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_stop_timeout_secs() -> u64 {
    10
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl RecordingConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl AppConfig {
    /// 读取 TOML 配置并叠加 `VIGIL_` 环境变量
    ///
    /// 显式给出的路径必须存在；未给出时 `vigil.toml` 可选。
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            bail!("auth.jwt_secret must be set");
        }
        if self.realtime.statistics_interval_secs == 0 {
            bail!("realtime.statistics_interval_secs must be >= 1");
        }
        if self.realtime.event_channel_capacity == 0 {
            bail!("realtime.event_channel_capacity must be >= 1");
        }
        if self.realtime.connection.max_connections_per_principal == 0 {
            bail!("realtime.connection.max_connections_per_principal must be >= 1");
        }

        let mut ids = HashSet::new();
        for camera in &self.cameras {
            camera
                .validate()
                .with_context(|| format!("invalid camera '{}'", camera.id))?;
            if !ids.insert(camera.id.as_str()) {
                bail!("duplicate camera id '{}'", camera.id);
            }
        }
        Ok(())
    }
}
