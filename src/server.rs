use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;

use crate::config::Config;
use crate::services::catalog::ServiceKind;
use crate::services::connection::ConnectionManager;
use crate::services::registry::{
    ConfigCallback, ConsulBackend, Protocol, RegistryAdapter, RegistryBackend, RegistryClient,
    RegistryError, ServiceRegistration,
};

const FALLBACK_IP: &str = "127.0.0.1";

/// 进程级组件：注册中心适配器、出站连接管理器以及本进程的注册
#[derive(Debug)]
pub struct Application {
    config: Config,
    adapter: Arc<RegistryAdapter>,
    manager: ConnectionManager,
    service_ids: Vec<String>,
    shut_down: AtomicBool,
}

impl Application {
    /// 加载远端配置、注册本进程并开始监听配置变化。
    /// 只有远端配置文档损坏时返回错误，注册中心不可达或注册失败只记录日志
    pub async fn bootstrap(
        mut config: Config,
        backend: Arc<dyn RegistryBackend>,
    ) -> Result<Self, RegistryError> {
        let adapter = Arc::new(RegistryAdapter::with_max_failures(
            backend,
            config.heartbeat.max_failures,
        ));

        match adapter.load_settings(&config.registry.config_path).await {
            Ok(remote) => config.apply_remote(&remote),
            Err(e @ RegistryError::ConfigCorrupt { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Registry unreachable, starting with local configuration");
            }
        }

        let config_path = config.registry.config_path.clone();
        let on_change: ConfigCallback = Arc::new(move |value: Option<String>| match value {
            Some(raw) => tracing::info!(key = %config_path, bytes = raw.len(), "Remote settings changed"),
            None => tracing::warn!(key = %config_path, "Remote settings removed"),
        });
        adapter.watch_config(
            &config.registry.config_path,
            on_change,
            config.watch_interval(),
        );

        let local_ip = resolve_local_ip(&config.registry.local_ip).await;
        let mut service_ids = Vec::new();
        for registration in build_registrations(&config, &local_ip)? {
            let service_id = registration.service_id.clone();
            if adapter.register_service(registration).await {
                service_ids.push(service_id);
            } else {
                tracing::warn!(service_id = %service_id, "Continuing without registration");
            }
        }

        let registry: Arc<dyn RegistryClient> = adapter.clone();
        let manager = ConnectionManager::new(registry, config.connection_config());

        tracing::info!(
            service = %config.service.name,
            version = %config.service.version,
            address = %local_ip,
            registrations = service_ids.len(),
            "Application started"
        );

        Ok(Self {
            config,
            adapter,
            manager,
            service_ids,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<RegistryAdapter> {
        &self.adapter
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// 本进程成功注册的服务 ID
    pub fn service_ids(&self) -> &[String] {
        &self.service_ids
    }

    /// 注销全部注册、关闭所有连接并等待后台循环退出，可重复调用
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down");
        self.adapter.shutdown().await;
        self.manager.close().await;
        tracing::info!("Shutdown complete");
    }
}

fn build_registrations(
    config: &Config,
    local_ip: &str,
) -> Result<Vec<ServiceRegistration>, RegistryError> {
    let ttl = config
        .heartbeat_ttl()
        .map_err(|_| RegistryError::InvalidDuration(config.heartbeat.ttl.clone()))?;
    let deregister_after = config
        .deregister_after()
        .map_err(|_| RegistryError::InvalidDuration(config.heartbeat.deregister_after.clone()))?;
    let name = &config.service.name;

    let http = ServiceRegistration::new(
        format!("{name}.http"),
        instance_id(name),
        local_ip,
        config.service.http_port,
        Protocol::Http,
    );
    let grpc = ServiceRegistration::new(
        format!("{name}.grpc"),
        instance_id(name),
        local_ip,
        config.service.grpc_port,
        Protocol::Grpc,
    )
    .with_tags(ServiceKind::registration_tags());

    Ok([http, grpc]
        .into_iter()
        .map(|registration| {
            registration
                .with_ttl(ttl)
                .with_deregister_after(deregister_after)
        })
        .collect())
}

fn instance_id(name: &str) -> String {
    format!("{name}-{}", uuid::Uuid::new_v4())
}

// 未配置时通过 UDP 套接字探测出口地址，不会真正发送数据
async fn resolve_local_ip(configured: &str) -> String {
    if let Ok(ip) = configured.parse::<IpAddr>() {
        return ip.to_string();
    }
    if !configured.is_empty() {
        tracing::warn!(local_ip = %configured, "Ignoring invalid local_ip");
    }
    match detect_local_ip().await {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to detect local IP, using {}", FALLBACK_IP);
            FALLBACK_IP.to_string()
        }
    }
}

async fn detect_local_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect("8.8.8.8:80").await?;
    Ok(socket.local_addr()?.ip())
}

pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend = ConsulBackend::new(
        &config.registry.address,
        Some(config.registry.token.clone()),
        Some(config.registry.dc.clone()),
    )?;
    tracing::info!(address = %backend.base_url(), "Using registry");

    let app = Application::bootstrap(config, Arc::new(backend)).await?;

    tokio::signal::ctrl_c().await?;
    app.shutdown().await;
    Ok(())
}
