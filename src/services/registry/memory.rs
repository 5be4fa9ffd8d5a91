use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::Instant;

use super::backend::RegistryBackend;
use super::error::RegistryError;
use super::types::{DiscoveredNode, ServiceRegistration, check_id};

// 检查状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealthStatus {
    Passing,
    Critical,
}

// 内存中的服务注册信息
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub registration: ServiceRegistration,
    pub registered_at: Instant,
    pub last_pass: Option<Instant>,
}

impl ServiceInfo {
    // TTL 内有过通过上报即为健康
    pub fn health_status(&self, now: Instant) -> ServiceHealthStatus {
        match self.last_pass {
            Some(last) if now.duration_since(last) <= self.registration.ttl => {
                ServiceHealthStatus::Passing
            }
            _ => ServiceHealthStatus::Critical,
        }
    }

    // critical 持续超过 deregister_after 后应被清理
    fn is_expired(&self, now: Instant) -> bool {
        let critical_since = match self.last_pass {
            Some(last) => last + self.registration.ttl,
            None => self.registered_at,
        };
        self.health_status(now) == ServiceHealthStatus::Critical
            && now.saturating_duration_since(critical_since) > self.registration.deregister_after
    }
}

/// 进程内注册中心，语义与 TTL 检查一致，用于测试和无外部注册中心的本地运行
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    // 服务ID -> 注册信息
    services: Arc<DashMap<String, ServiceInfo>>,
    kv: Arc<DashMap<String, String>>,
    // 检查ID -> 通过次数
    passes: Arc<DashMap<String, u64>>,
    unavailable: Arc<AtomicBool>,
    requests: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟注册中心不可用，所有操作返回错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 某个服务累计收到的通过上报次数
    pub fn pass_count(&self, service_id: &str) -> u64 {
        self.passes
            .get(&check_id(service_id))
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn service_info(&self, service_id: &str) -> Option<ServiceInfo> {
        self.services.get(service_id).map(|entry| entry.value().clone())
    }

    /// 绕过适配器直接写存储，模拟其他进程修改配置
    pub fn put_raw(&self, key: &str, value: &str) {
        self.kv.insert(key.to_string(), value.to_string());
    }

    pub fn delete_raw(&self, key: &str) {
        self.kv.remove(key);
    }

    fn guard(&self) -> Result<(), RegistryError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RegistryError::Unavailable)
        } else {
            Ok(())
        }
    }

    // 清理过期的服务
    fn cleanup_expired_services(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .services
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        for service_id in expired {
            if self.services.remove(&service_id).is_some() {
                tracing::info!(
                    service_id = %service_id,
                    "Removed service whose check stayed critical past deregister_after"
                );
            }
        }
    }
}

#[tonic::async_trait]
impl RegistryBackend for MemoryBackend {
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError> {
        self.guard()?;
        self.services.insert(
            registration.service_id.clone(),
            ServiceInfo {
                registration: registration.clone(),
                registered_at: Instant::now(),
                last_pass: None,
            },
        );
        Ok(())
    }

    async fn pass_ttl(&self, check_id: &str) -> Result<(), RegistryError> {
        self.guard()?;
        let service_id = check_id.strip_prefix("service:").unwrap_or(check_id);
        let mut service = self
            .services
            .get_mut(service_id)
            .ok_or_else(|| RegistryError::NotRegistered(service_id.to_string()))?;
        service.last_pass = Some(Instant::now());
        drop(service);

        *self.passes.entry(check_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        self.guard()?;
        self.services
            .remove(service_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotRegistered(service_id.to_string()))
    }

    async fn service_exists(&self, service_id: &str) -> Result<bool, RegistryError> {
        self.guard()?;
        self.cleanup_expired_services();
        Ok(self.services.contains_key(service_id))
    }

    async fn healthy_instances(
        &self,
        service_name: &str,
    ) -> Result<Vec<DiscoveredNode>, RegistryError> {
        self.guard()?;
        self.cleanup_expired_services();

        let now = Instant::now();
        let mut instances: Vec<(Instant, DiscoveredNode)> = self
            .services
            .iter()
            .filter(|entry| entry.registration.service_name == service_name)
            .filter(|entry| entry.health_status(now) == ServiceHealthStatus::Passing)
            .map(|entry| {
                let registration = &entry.registration;
                (
                    entry.registered_at,
                    DiscoveredNode::new(registration.address.clone(), registration.port),
                )
            })
            .collect();

        // 按注册先后返回，保证顺序稳定
        instances.sort_by_key(|(registered_at, _)| *registered_at);
        Ok(instances.into_iter().map(|(_, node)| node).collect())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        self.guard()?;
        Ok(self.kv.get(key).map(|value| value.clone()))
    }

    async fn kv_put(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.guard()?;
        self.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn kv_keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        self.guard()?;
        let mut keys: Vec<String> = self
            .kv
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
