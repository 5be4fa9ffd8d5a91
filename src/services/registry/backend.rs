use super::error::RegistryError;
use super::types::{DiscoveredNode, ServiceRegistration};

/// 注册中心存储的线路级操作。
///
/// `RegistryAdapter` 在此之上实现心跳、缓存与监听；每个方法只做一次往返，
/// 不重试也不缓存。
#[tonic::async_trait]
pub trait RegistryBackend: Send + Sync + std::fmt::Debug {
    /// 声明服务及其 TTL 检查（幂等覆盖）
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError>;

    /// 上报一次 TTL 检查通过
    async fn pass_ttl(&self, check_id: &str) -> Result<(), RegistryError>;

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError>;

    /// 查询注册是否仍存在，用于注销失败时的诊断
    async fn service_exists(&self, service_id: &str) -> Result<bool, RegistryError>;

    /// 只返回健康实例
    async fn healthy_instances(&self, service_name: &str)
    -> Result<Vec<DiscoveredNode>, RegistryError>;

    /// 读取原始值，键不存在时返回 `None`
    async fn kv_get(&self, key: &str) -> Result<Option<String>, RegistryError>;

    async fn kv_put(&self, key: &str, value: &str) -> Result<(), RegistryError>;

    /// 列出前缀下的所有键
    async fn kv_keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError>;
}
