use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::services::connection::ConnectionConfig;
use crate::services::registry::{RemoteSettings, parse_duration};

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "GRPC_CONSUL_";

/// 本地配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to read environment overrides: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid duration for {field}: {value}")]
    InvalidDuration { field: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub service: ServiceConfig,
    pub heartbeat: HeartbeatConfig,
    pub connection: ConnectionSettings,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
}

// 注册中心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// scheme://host:port
    pub address: String,
    pub token: String,
    pub dc: String,
    /// 启动配置文档在 KV 中的键
    pub config_path: String,
    /// 为空时自动探测
    pub local_ip: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: String::new(),
            dc: String::new(),
            config_path: "bsi/hello_rs".to_string(),
            local_ip: String::new(),
        }
    }
}

// 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    pub http_port: u16,
    pub grpc_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "bsi.hello_rs".to_string(),
            version: "v0.0.1".to_string(),
            http_port: 8001,
            grpc_port: 9001,
        }
    }
}

// 心跳配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub ttl: String,
    pub deregister_after: String,
    pub max_failures: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ttl: "30s".to_string(),
            deregister_after: "90s".to_string(),
            max_failures: 5,
        }
    }
}

// 出站连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub default_host: String,
    pub default_port: u16,
    pub direct_targets: HashMap<String, String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            probe_timeout_ms: 1000,
            request_timeout_secs: 30,
            default_host: "localhost".to_string(),
            default_port: 9001,
            direct_targets: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// 环境变量覆盖项，例如 GRPC_CONSUL_REGISTRY_ADDRESS
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    registry_address: Option<String>,
    registry_token: Option<String>,
    registry_dc: Option<String>,
    config_path: Option<String>,
    local_ip: Option<String>,
    service_name: Option<String>,
    service_version: Option<String>,
    http_port: Option<u16>,
    grpc_port: Option<u16>,
    heartbeat_ttl: Option<String>,
    deregister_after: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// 读取 `config.toml`（可选）并应用 `.env` 与环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(DEFAULT_CONFIG_FILE)?;
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_env()?;
        config.apply_env(overrides);
        config.validate()?;
        Ok(config)
    }

    /// 文件不存在时使用默认配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let config_str = fs::read_to_string(path)?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: EnvOverrides) {
        macro_rules! set {
            ($target:expr, $value:expr) => {
                if let Some(value) = $value {
                    $target = value;
                }
            };
        }
        set!(self.registry.address, env.registry_address);
        set!(self.registry.token, env.registry_token);
        set!(self.registry.dc, env.registry_dc);
        set!(self.registry.config_path, env.config_path);
        set!(self.registry.local_ip, env.local_ip);
        set!(self.service.name, env.service_name);
        set!(self.service.version, env.service_version);
        set!(self.service.http_port, env.http_port);
        set!(self.service.grpc_port, env.grpc_port);
        set!(self.heartbeat.ttl, env.heartbeat_ttl);
        set!(self.heartbeat.deregister_after, env.deregister_after);
        set!(self.logging.level, env.log_level);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.heartbeat_ttl()?;
        self.deregister_after()?;
        Ok(())
    }

    pub fn heartbeat_ttl(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.heartbeat.ttl).map_err(|_| ConfigError::InvalidDuration {
            field: "heartbeat.ttl",
            value: self.heartbeat.ttl.clone(),
        })
    }

    pub fn deregister_after(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.heartbeat.deregister_after).map_err(|_| {
            ConfigError::InvalidDuration {
                field: "heartbeat.deregister_after",
                value: self.heartbeat.deregister_after.clone(),
            }
        })
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch.interval_secs.max(1))
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let settings = &self.connection;
        ConnectionConfig {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            probe_timeout: Duration::from_millis(settings.probe_timeout_ms),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            default_host: settings.default_host.clone(),
            default_port: settings.default_port,
            direct_targets: settings.direct_targets.clone(),
        }
    }

    /// 合并注册中心中的启动配置，远端值覆盖本地值
    pub fn apply_remote(&mut self, remote: &RemoteSettings) {
        if let Some(ref service) = remote.service {
            if let Some(ref name) = service.name {
                self.service.name = name.clone();
            }
            if let Some(ref version) = service.version {
                self.service.version = version.clone();
            }
            if let Some(port) = service.http_port {
                self.service.http_port = port;
            }
            if let Some(port) = service.grpc_port {
                self.service.grpc_port = port;
            }
        }
        if let Some(ref registry) = remote.registry {
            if let Some(ref dc) = registry.dc {
                self.registry.dc = dc.clone();
            }
            if let Some(ref local_ip) = registry.local_ip {
                self.registry.local_ip = local_ip.clone();
            }
        }
    }
}
