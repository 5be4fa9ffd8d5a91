use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

use crate::services::registry::RegistryClient;

use super::{
    connection::Connection,
    stub::ServiceStub,
    types::{ConnectError, ConnectionConfig, ConnectionState, ConnectionStats},
};

// 每个服务名一个槽位；槽位锁保证同名服务同时只有一次建连
type ConnectionSlot = Arc<Mutex<Option<Connection>>>;

/// 多服务连接管理器：按服务名惰性建立并缓存通道，失效时自动重连
#[derive(Clone)]
pub struct ConnectionManager {
    registry: Arc<dyn RegistryClient>,
    config: ConnectionConfig,
    // 服务名 -> 连接槽位
    slots: Arc<DashMap<String, ConnectionSlot>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("services", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(registry: Arc<dyn RegistryClient>, config: ConnectionConfig) -> Self {
        Self {
            registry,
            config,
            slots: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn slot(&self, service_name: &str) -> ConnectionSlot {
        self.slots
            .entry(service_name.to_string())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, service_name: &str) -> Option<ConnectionSlot> {
        self.slots
            .get(service_name)
            .map(|entry| entry.value().clone())
    }

    /// 获取服务存根：缓存连接仍就绪时直接复用，否则重新建立
    pub async fn get_service_stub<S: ServiceStub>(
        &self,
        service_name: &str,
        use_discovery: bool,
    ) -> Option<S> {
        let stub = self.stub_from_slot::<S>(service_name, use_discovery).await;
        if stub.is_none() {
            self.release_slot(service_name);
        }
        stub
    }

    async fn stub_from_slot<S: ServiceStub>(
        &self,
        service_name: &str,
        use_discovery: bool,
    ) -> Option<S> {
        let slot = self.slot(service_name);
        let mut guard = slot.lock().await;

        if let Some(connection) = guard.as_ref() {
            if self.probe(connection).await {
                tracing::debug!(
                    service_name = %service_name,
                    connection_id = connection.id,
                    "Reusing cached connection"
                );
                return Some(connection.stub::<S>());
            }

            tracing::warn!(
                service_name = %service_name,
                target = %connection.target,
                "Cached connection is not ready, reconnecting"
            );
            if let Some(stale) = guard.take() {
                Self::close_connection(stale);
            }
        }

        let result = if use_discovery {
            self.discover_target(service_name).await
        } else {
            self.open_channel(&self.config.direct_target(service_name))
                .await
        };
        self.install::<S>(&mut guard, service_name, result)
    }

    /// 通过服务发现连接，使用第一个健康节点
    pub async fn connect_via_discovery<S: ServiceStub>(&self, service_name: &str) -> Option<S> {
        self.replace_in_slot::<S>(service_name, self.discover_target(service_name))
            .await
    }

    /// 不经服务发现直接连接到指定地址
    pub async fn connect_direct<S: ServiceStub>(
        &self,
        service_name: &str,
        host: &str,
        port: u16,
    ) -> Option<S> {
        let target = format!("{host}:{port}");
        self.replace_in_slot::<S>(service_name, self.open_channel(&target))
            .await
    }

    // 显式建连：成功时替换已有连接，失败时保留
    async fn replace_in_slot<S: ServiceStub>(
        &self,
        service_name: &str,
        connect: impl Future<Output = Result<(Channel, String), ConnectError>>,
    ) -> Option<S> {
        let stub = {
            let slot = self.slot(service_name);
            let mut guard = slot.lock().await;
            let result = connect.await;
            if result.is_ok()
                && let Some(previous) = guard.take()
            {
                Self::close_connection(previous);
            }
            self.install::<S>(&mut guard, service_name, result)
        };
        if stub.is_none() {
            self.release_slot(service_name);
        }
        stub
    }

    // 槽位为空且没有其他任务持有时从表中移除
    fn release_slot(&self, service_name: &str) {
        self.slots.remove_if(service_name, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot.try_lock().map(|guard| guard.is_none()).unwrap_or(false)
        });
    }

    async fn discover_target(
        &self,
        service_name: &str,
    ) -> Result<(Channel, String), ConnectError> {
        tracing::info!(service_name = %service_name, "Discovering service");
        let nodes = self.registry.discover_service(service_name).await;

        // 不做客户端负载均衡，总是使用第一个节点
        let node = nodes
            .first()
            .ok_or_else(|| ConnectError::NoHealthyInstance(service_name.to_string()))?;

        tracing::info!(
            service_name = %service_name,
            address = %node.address,
            port = node.port,
            "Discovered service node"
        );
        self.open_channel(&node.target()).await
    }

    // 建立不加密的通道并等待就绪
    async fn open_channel(&self, target: &str) -> Result<(Channel, String), ConnectError> {
        tracing::info!(target = %target, "Connecting to gRPC service");

        let endpoint = Endpoint::from_shared(format!("http://{target}"))
            .map_err(|source| ConnectError::InvalidTarget {
                target: target.to_string(),
                source,
            })?
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout);

        match tokio::time::timeout(self.config.connect_timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => Ok((channel, target.to_string())),
            Ok(Err(source)) => Err(ConnectError::Transport {
                target: target.to_string(),
                source,
            }),
            Err(_) => Err(ConnectError::Timeout {
                target: target.to_string(),
                timeout: self.config.connect_timeout,
            }),
        }
    }

    // 把建连结果放入槽位；失败只记录日志，不产生缓存条目
    fn install<S: ServiceStub>(
        &self,
        guard: &mut Option<Connection>,
        service_name: &str,
        result: Result<(Channel, String), ConnectError>,
    ) -> Option<S> {
        match result {
            Ok((channel, target)) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let connection = Connection::new::<S>(id, service_name, target, channel);
                let stub = connection.stub::<S>();

                tracing::info!(
                    service_name = %service_name,
                    target = %connection.target,
                    connection_id = id,
                    "gRPC connection established"
                );
                *guard = Some(connection);
                Some(stub)
            }
            Err(e) => {
                tracing::error!(
                    service_name = %service_name,
                    error = %e,
                    "Failed to connect to gRPC service"
                );
                None
            }
        }
    }

    // 就绪探测：未被标记失效，且目标在限定时间内能完成一次 HTTP/2 握手
    async fn probe(&self, connection: &Connection) -> bool {
        if connection.is_dead() {
            return false;
        }

        let Ok(endpoint) = Endpoint::from_shared(format!("http://{}", connection.target)) else {
            return false;
        };
        let endpoint = endpoint.connect_timeout(self.config.probe_timeout);

        match tokio::time::timeout(self.config.probe_timeout, endpoint.connect()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(target = %connection.target, error = %e, "Readiness probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(target = %connection.target, "Readiness probe timed out");
                false
            }
        }
    }

    fn close_connection(connection: Connection) {
        tracing::info!(
            service_name = %connection.service_name,
            connection_id = connection.id,
            target = %connection.target,
            "Closed connection"
        );
        // 通道在最后一个句柄释放后关闭
        drop(connection);
    }

    /// 标记连接失效，下一次获取存根时会重建。返回是否存在该连接
    pub async fn mark_dead(&self, service_name: &str) -> bool {
        let Some(slot) = self.existing_slot(service_name) else {
            return false;
        };
        let mut guard = slot.lock().await;
        match guard.as_mut() {
            Some(connection) => {
                tracing::warn!(
                    service_name = %service_name,
                    connection_id = connection.id,
                    "Marking connection as dead"
                );
                connection.mark_dead();
                true
            }
            None => false,
        }
    }

    /// 关闭指定服务的连接；不存在时什么也不做
    pub async fn close_service(&self, service_name: &str) {
        let Some(slot) = self.existing_slot(service_name) else {
            return;
        };
        let taken = slot.lock().await.take();
        drop(slot);
        if let Some(connection) = taken {
            Self::close_connection(connection);
        }
        self.release_slot(service_name);
    }

    /// 关闭所有连接
    pub async fn close(&self) {
        let names: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            self.close_service(&name).await;
        }
        tracing::info!("All gRPC connections closed");
    }

    /// 当前连接的 ID，可用于判断连接是否被复用
    pub async fn connection_id(&self, service_name: &str) -> Option<u64> {
        let slot = self.existing_slot(service_name)?;
        let guard = slot.lock().await;
        guard.as_ref().map(|connection| connection.id)
    }

    /// 连接状态；有建连正在进行时为 `Connecting`
    pub fn connection_state(&self, service_name: &str) -> Option<ConnectionState> {
        let slot = self.existing_slot(service_name)?;
        let state = match slot.try_lock() {
            Ok(guard) => guard.as_ref().map(|connection| connection.state),
            Err(_) => Some(ConnectionState::Connecting),
        };
        state
    }

    pub async fn connected_services(&self) -> Vec<String> {
        let slots: Vec<(String, ConnectionSlot)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut names = Vec::new();
        for (name, slot) in slots {
            if slot.lock().await.is_some() {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    pub async fn get_stats(&self) -> ConnectionStats {
        let slots: Vec<ConnectionSlot> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        let mut stats = ConnectionStats {
            known_services: slots.len(),
            ..Default::default()
        };
        for slot in slots {
            match slot.lock().await.as_ref() {
                Some(connection) if connection.is_dead() => stats.dead_connections += 1,
                Some(_) => stats.active_connections += 1,
                None => {}
            }
        }
        stats
    }
}
