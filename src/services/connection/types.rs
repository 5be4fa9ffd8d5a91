use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

// 连接管理器配置
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// 新建连接等待就绪的上限
    pub connect_timeout: Duration,
    /// 复用缓存连接前的就绪探测上限
    pub probe_timeout: Duration,
    /// 单次 RPC 超时
    pub request_timeout: Duration,
    /// 直连模式下的默认目标
    pub default_host: String,
    pub default_port: u16,
    /// 服务名 -> `host:port`，直连模式优先使用
    pub direct_targets: HashMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            default_host: "localhost".to_string(),
            default_port: 9001,
            direct_targets: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    // 直连目标：显式配置优先，否则使用默认主机与端口
    pub fn direct_target(&self, service_name: &str) -> String {
        self.direct_targets
            .get(service_name)
            .cloned()
            .unwrap_or_else(|| format!("{}:{}", self.default_host, self.default_port))
    }
}

// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Dead,
}

/// 建立连接时的错误，只在管理器内部记录，调用方看到的是 `None`
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("No healthy instance found for service: {0}")]
    NoHealthyInstance(String),

    #[error("Invalid target {target}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("Timed out after {timeout:?} connecting to {target}")]
    Timeout { target: String, timeout: Duration },

    #[error("Failed to connect to {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },
}

// 连接统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub dead_connections: usize,
    pub known_services: usize,
}
