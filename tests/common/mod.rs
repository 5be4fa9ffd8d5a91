#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use grpc_consul::services::connection::{ConnectionConfig, ConnectionManager};
use grpc_consul::services::registry::{
    ConfigCallback, DiscoveredNode, RegistryClient, RegistryError, ServiceRegistration, WatchId,
};
use grpc_consul::user::user_service_server::{UserService, UserServiceServer};
use grpc_consul::user::{CreateUserRequest, UserReply, UserRequest};

/// 用户 ID 为该值时服务端返回 `Unavailable`
pub const UNAVAILABLE_USER_ID: i64 = 503;

// 测试用的用户服务
#[derive(Debug, Default)]
pub struct FakeUserService {
    next_id: AtomicI64,
}

#[tonic::async_trait]
impl UserService for FakeUserService {
    async fn get_user(&self, request: Request<UserRequest>) -> Result<Response<UserReply>, Status> {
        let id = request.into_inner().id;
        match id.parse::<i64>() {
            Ok(UNAVAILABLE_USER_ID) => Err(Status::unavailable("backend restarting")),
            Ok(user_id) if user_id > 0 => Ok(Response::new(UserReply {
                name: format!("user-{user_id}"),
                id,
            })),
            _ => Err(Status::not_found(format!("user {id} not found"))),
        }
    }

    async fn create_user(
        &self,
        request: Request<CreateUserRequest>,
    ) -> Result<Response<UserReply>, Status> {
        let id = 100 + self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(UserReply {
            id: id.to_string(),
            name: request.into_inner().name,
        }))
    }
}

/// 在随机端口启动用户服务，返回监听地址
pub async fn spawn_user_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(UserServiceServer::new(FakeUserService::default()))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    addr
}

/// 可停止的用户服务；`stop` 返回时监听端口已关闭
pub struct StoppableServer {
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl StoppableServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            Server::builder()
                .add_service(UserServiceServer::new(FakeUserService::default()))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    signal.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        self.shutdown.send(()).ok();
        let mut handle = self.handle;
        // 客户端连接迟迟不关闭时直接终止服务任务
        if tokio::time::timeout(Duration::from_secs(2), &mut handle).await.is_err() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// 返回一个当前没有监听者的本地端口
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// 只统计发现次数的注册中心
#[derive(Debug, Default)]
pub struct StaticRegistry {
    nodes: Mutex<Vec<DiscoveredNode>>,
    discoveries: AtomicUsize,
}

impl StaticRegistry {
    pub fn with_node(addr: SocketAddr) -> Arc<Self> {
        let registry = Self::default();
        registry.set_nodes(vec![DiscoveredNode::new(addr.ip().to_string(), addr.port())]);
        Arc::new(registry)
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_nodes(&self, nodes: Vec<DiscoveredNode>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl RegistryClient for StaticRegistry {
    async fn register_service(&self, _registration: ServiceRegistration) -> bool {
        true
    }

    async fn deregister_service(&self, _service_id: &str) -> bool {
        true
    }

    async fn discover_service(&self, _service_name: &str) -> Vec<DiscoveredNode> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        // 放大并发窗口
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.nodes.lock().unwrap().clone()
    }

    async fn get_config(&self, _key: &str) -> Result<Option<String>, RegistryError> {
        Ok(None)
    }

    fn watch_config(&self, key: &str, _callback: ConfigCallback, _interval: Duration) -> WatchId {
        WatchId::new(key)
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

pub fn manager_with(registry: Arc<StaticRegistry>) -> ConnectionManager {
    ConnectionManager::new(registry, test_config())
}
