use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::backend::RegistryBackend;
use super::client::RegistryClient;
use super::error::RegistryError;
use super::heartbeat::HeartbeatTask;
use super::types::{
    ConfigCacheEntry, ConfigCallback, DiscoveredNode, HeartbeatCounters, HeartbeatStats,
    RegistrationState, ServiceRegistration, WatchId,
};
use crate::services::supervisor::LoopSupervisor;

/// 默认连续心跳失败上限
pub const DEFAULT_MAX_HEARTBEAT_FAILURES: u32 = 5;

// 本进程持有的注册
#[derive(Debug)]
struct RegistrationEntry {
    registration: ServiceRegistration,
    state: RegistrationState,
    counters: Arc<HeartbeatCounters>,
}

/// 基于 TTL 检查的注册中心适配器
#[derive(Debug)]
pub struct RegistryAdapter {
    pub(super) backend: Arc<dyn RegistryBackend>,
    registrations: DashMap<String, RegistrationEntry>,
    pub(super) config_cache: Arc<DashMap<String, ConfigCacheEntry>>,
    pub(super) supervisor: LoopSupervisor,
    max_failures: u32,
}

fn heartbeat_key(service_id: &str) -> String {
    format!("heartbeat:{service_id}")
}

impl RegistryAdapter {
    pub fn new(backend: Arc<dyn RegistryBackend>) -> Self {
        Self::with_max_failures(backend, DEFAULT_MAX_HEARTBEAT_FAILURES)
    }

    pub fn with_max_failures(backend: Arc<dyn RegistryBackend>, max_failures: u32) -> Self {
        Self {
            backend,
            registrations: DashMap::new(),
            config_cache: Arc::new(DashMap::new()),
            supervisor: LoopSupervisor::new(),
            max_failures: max_failures.max(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn RegistryBackend> {
        &self.backend
    }

    pub fn registration_state(&self, service_id: &str) -> RegistrationState {
        self.registrations
            .get(service_id)
            .map(|entry| entry.state)
            .unwrap_or(RegistrationState::Unregistered)
    }

    pub fn registration(&self, service_id: &str) -> Option<ServiceRegistration> {
        self.registrations
            .get(service_id)
            .map(|entry| entry.registration.clone())
    }

    pub fn registered_ids(&self) -> Vec<String> {
        self.registrations
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn heartbeat_stats(&self, service_id: &str) -> Option<HeartbeatStats> {
        self.registrations
            .get(service_id)
            .map(|entry| entry.counters.snapshot())
    }

    pub fn is_heartbeat_running(&self, service_id: &str) -> bool {
        self.supervisor.is_running(&heartbeat_key(service_id))
    }

    fn track(&self, registration: &ServiceRegistration, counters: Arc<HeartbeatCounters>) {
        self.registrations.insert(
            registration.service_id.clone(),
            RegistrationEntry {
                registration: registration.clone(),
                state: RegistrationState::Registering,
                counters,
            },
        );
    }

    fn set_state(&self, service_id: &str, state: RegistrationState) {
        if let Some(mut entry) = self.registrations.get_mut(service_id) {
            entry.state = state;
        }
    }

    // 注册成功后立即上报一次，跳过新 TTL 检查初始的 critical 窗口
    async fn initial_pass(&self, registration: &ServiceRegistration, counters: &HeartbeatCounters) {
        match self.backend.pass_ttl(&registration.check_id()).await {
            Ok(()) => counters.record_pass(),
            Err(e) => {
                counters.record_failure();
                tracing::warn!(
                    service_id = %registration.service_id,
                    error = %e,
                    "Initial TTL pass failed, heartbeat loop will retry"
                );
            }
        }
    }

    fn start_heartbeat(&self, registration: &ServiceRegistration, counters: Arc<HeartbeatCounters>) {
        let task = HeartbeatTask {
            service_id: registration.service_id.clone(),
            check_id: registration.check_id(),
            interval: registration.heartbeat_interval(),
            max_failures: self.max_failures,
            backend: self.backend.clone(),
            counters,
        };
        self.supervisor
            .spawn(heartbeat_key(&registration.service_id), move |token| task.run(token));
    }

    // 注销失败时查询注册状态，输出更有指向性的日志
    async fn diagnose_failed_deregistration(&self, service_id: &str, error: &RegistryError) {
        match self.backend.service_exists(service_id).await {
            Ok(true) => tracing::error!(
                service_id = %service_id,
                error = %error,
                "Failed to deregister service, registration still exists"
            ),
            Ok(false) => tracing::warn!(
                service_id = %service_id,
                error = %error,
                "Failed to deregister service, registration is already gone"
            ),
            Err(lookup_error) => tracing::error!(
                service_id = %service_id,
                error = %error,
                lookup_error = %lookup_error,
                "Failed to deregister service and unable to query its current state"
            ),
        }
    }

    /// 注销本进程的所有注册，然后停止所有后台循环
    pub async fn shutdown(&self) {
        for service_id in self.registered_ids() {
            self.deregister_service(&service_id).await;
        }
        self.supervisor.shutdown().await;
    }
}

#[tonic::async_trait]
impl RegistryClient for RegistryAdapter {
    async fn register_service(&self, registration: ServiceRegistration) -> bool {
        let service_id = registration.service_id.clone();

        // 已存在的注册在覆盖成功前保持原样，心跳继续运行
        let existing = self
            .registrations
            .get(&service_id)
            .map(|entry| entry.counters.clone());
        let counters = match existing {
            Some(ref counters) => counters.clone(),
            None => {
                let counters = Arc::new(HeartbeatCounters::default());
                self.track(&registration, counters.clone());
                counters
            }
        };

        if let Err(e) = self.backend.register(&registration).await {
            tracing::error!(
                service_name = %registration.service_name,
                service_id = %service_id,
                error = %e,
                "Failed to register service"
            );
            if existing.is_none() {
                self.registrations.remove(&service_id);
            }
            return false;
        }

        self.track(&registration, counters.clone());
        self.initial_pass(&registration, &counters).await;
        self.start_heartbeat(&registration, counters);
        self.set_state(&service_id, RegistrationState::Active);

        tracing::info!(
            service_name = %registration.service_name,
            service_id = %service_id,
            address = %registration.address,
            port = registration.port,
            protocol = %registration.protocol,
            ttl_secs = registration.ttl.as_secs(),
            "Registered service"
        );
        true
    }

    async fn deregister_service(&self, service_id: &str) -> bool {
        let known = self.registrations.contains_key(service_id);
        self.set_state(service_id, RegistrationState::Deregistering);

        // 先停心跳，保证返回后不再上报
        self.supervisor.stop(&heartbeat_key(service_id)).await;

        let result = self.backend.deregister(service_id).await;
        self.registrations.remove(service_id);

        match result {
            Ok(()) => {
                tracing::info!(service_id = %service_id, "Deregistered service");
                true
            }
            Err(e) => {
                if !known {
                    tracing::warn!(service_id = %service_id, "Deregistering service unknown to this process");
                }
                self.diagnose_failed_deregistration(service_id, &e).await;
                false
            }
        }
    }

    async fn discover_service(&self, service_name: &str) -> Vec<DiscoveredNode> {
        match self.backend.healthy_instances(service_name).await {
            Ok(nodes) => {
                tracing::debug!(
                    service_name = %service_name,
                    instances = nodes.len(),
                    "Discovered service instances"
                );
                nodes
            }
            Err(e) => {
                tracing::error!(
                    service_name = %service_name,
                    error = %e,
                    "Service discovery failed"
                );
                Vec::new()
            }
        }
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>, RegistryError> {
        self.cached_config(key).await
    }

    fn watch_config(&self, key: &str, callback: ConfigCallback, interval: Duration) -> WatchId {
        self.spawn_watch(key, callback, interval)
    }
}
