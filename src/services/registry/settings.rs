use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::RegistryError;

/// 注册中心中存储的启动配置文档（YAML，兼容 JSON）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub service: Option<RemoteServiceSection>,
    pub registry: Option<RemoteRegistrySection>,
    pub app_setting: Option<AppSetting>,
    /// 本模块不关心的段落（数据库、缓存等）原样保留
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteServiceSection {
    pub name: Option<String>,
    pub version: Option<String>,
    pub http_port: Option<u16>,
    pub grpc_port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteRegistrySection {
    pub dc: Option<String>,
    pub local_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSetting {
    pub environment: Option<String>,
    pub debug: Option<bool>,
}

impl RemoteSettings {
    pub fn decode(key: &str, raw: &str) -> Result<Self, RegistryError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(raw).map_err(|source| RegistryError::ConfigCorrupt {
            key: key.to_string(),
            source,
        })
    }

    pub fn section(&self, name: &str) -> Option<&serde_yaml::Value> {
        self.extra.get(name)
    }
}
