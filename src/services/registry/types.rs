use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use super::error::RegistryError;

/// 心跳间隔下限
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

// 服务协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Grpc => f.write_str("grpc"),
        }
    }
}

/// 服务注册描述
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRegistration {
    pub service_name: String,
    /// 每个进程实例唯一
    pub service_id: String,
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    pub ttl: Duration,
    /// 检查处于 critical 多久后由注册中心自动注销
    pub deregister_after: Duration,
    pub tags: Vec<String>,
}

impl ServiceRegistration {
    pub fn new(
        service_name: impl Into<String>,
        service_id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        protocol: Protocol,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_id: service_id.into(),
            address: address.into(),
            port,
            protocol,
            ttl: Duration::from_secs(30),
            deregister_after: Duration::from_secs(90),
            tags: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_deregister_after(mut self, deregister_after: Duration) -> Self {
        self.deregister_after = deregister_after;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// TTL 检查的 ID，与注册中心为单检查服务生成的默认 ID 一致
    pub fn check_id(&self) -> String {
        check_id(&self.service_id)
    }

    /// 心跳间隔为 TTL 的一半，不低于 `MIN_HEARTBEAT_INTERVAL`
    pub fn heartbeat_interval(&self) -> Duration {
        (self.ttl / 2).max(MIN_HEARTBEAT_INTERVAL)
    }
}

pub fn check_id(service_id: &str) -> String {
    format!("service:{service_id}")
}

/// 服务发现返回的节点
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredNode {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

impl DiscoveredNode {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// 连接目标，格式为 `host:port`
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// 单个注册的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Active,
    Deregistering,
}

// 配置缓存条目
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigCacheEntry {
    pub value: Option<String>,
    pub fetched_at: SystemTime,
}

impl ConfigCacheEntry {
    pub fn new(value: Option<String>) -> Self {
        Self {
            value,
            fetched_at: SystemTime::now(),
        }
    }
}

/// 配置变化回调，参数为新值（键被删除时为 `None`）
pub type ConfigCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// 配置监听任务的标识
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchId(String);

impl WatchId {
    pub fn new(key: &str) -> Self {
        Self(format!("watch:{key}:{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 心跳统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// 成功上报次数（含注册时的首次上报）
    pub passes: u64,
    /// 当前连续失败次数
    pub consecutive_failures: u32,
    pub total_failures: u64,
    /// 连续失败达到上限的次数，可用于发现注册中心故障
    pub exhausted_streaks: u64,
}

#[derive(Debug, Default)]
pub(crate) struct HeartbeatCounters {
    passes: AtomicU64,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    exhausted_streaks: AtomicU64,
}

impl HeartbeatCounters {
    pub(crate) fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// 记录一次失败，返回当前连续失败次数
    pub(crate) fn record_failure(&self) -> u32 {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn reset_streak(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.exhausted_streaks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> HeartbeatStats {
        HeartbeatStats {
            passes: self.passes.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            exhausted_streaks: self.exhausted_streaks.load(Ordering::Relaxed),
        }
    }
}

/// 解析 `"30s"` / `"1m"` / `"1h"` 形式的时长，纯数字按秒处理
pub fn parse_duration(value: &str) -> Result<Duration, RegistryError> {
    let trimmed = value.trim();
    let invalid = || RegistryError::InvalidDuration(value.to_string());

    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((idx, 's')) => (&trimmed[..idx], 1),
        Some((idx, 'm')) => (&trimmed[..idx], 60),
        Some((idx, 'h')) => (&trimmed[..idx], 3600),
        Some(_) => (trimmed, 1),
        None => return Err(invalid()),
    };

    let amount: u64 = digits.trim().parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }

    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// 转换为注册中心接受的时长字符串
pub fn format_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs().max(1))
}
