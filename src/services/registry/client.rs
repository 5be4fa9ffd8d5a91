use std::time::Duration;

use super::error::RegistryError;
use super::types::{ConfigCallback, DiscoveredNode, ServiceRegistration, WatchId};

/// 注册中心能力接口，所有后端实现都需满足此契约
#[tonic::async_trait]
pub trait RegistryClient: Send + Sync {
    /// 注册服务并开始心跳。失败时记录日志并返回 `false`，不会中断启动流程
    async fn register_service(&self, registration: ServiceRegistration) -> bool;

    /// 注销服务并停止心跳。未知 ID 返回 `false`
    async fn deregister_service(&self, service_id: &str) -> bool;

    /// 健康实例列表，没有实例时为空
    async fn discover_service(&self, service_name: &str) -> Vec<DiscoveredNode>;

    /// 缓存优先读取配置
    async fn get_config(&self, key: &str) -> Result<Option<String>, RegistryError>;

    /// 启动后台轮询，仅在值相对首次轮询的基线发生变化时调用回调
    fn watch_config(&self, key: &str, callback: ConfigCallback, interval: Duration) -> WatchId;
}
