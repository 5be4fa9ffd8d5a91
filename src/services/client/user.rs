use tonic::transport::Channel;
use tonic::{Code, Status};

use super::ClientError;
use crate::services::connection::ConnectionManager;
use crate::user::user_service_client::UserServiceClient as UserServiceStub;
use crate::user::{CreateUserRequest, UserReply, UserRequest};

/// 默认的用户服务注册名
pub const DEFAULT_USER_SERVICE: &str = "user.grpc";

/// 用户信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
}

impl TryFrom<UserReply> for User {
    type Error = ClientError;

    fn try_from(reply: UserReply) -> Result<Self, Self::Error> {
        let id = reply
            .id
            .parse()
            .map_err(|_| ClientError::MalformedReply(format!("invalid user id: {:?}", reply.id)))?;
        Ok(Self {
            id,
            name: reply.name,
        })
    }
}

/// 用户服务客户端：固定服务名，经由连接管理器获取存根
#[derive(Debug, Clone)]
pub struct UserServiceClient {
    manager: ConnectionManager,
    service_name: Option<String>,
    stub: Option<UserServiceStub<Channel>>,
}

impl UserServiceClient {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            service_name: None,
            stub: None,
        }
    }

    /// 连接到用户服务，可重复调用；未指定服务名时使用 `user.grpc`
    pub async fn connect(&mut self, service_name: Option<&str>, use_discovery: bool) -> bool {
        let service_name = service_name
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_USER_SERVICE)
            .to_string();

        self.stub = self
            .manager
            .get_service_stub::<UserServiceStub<Channel>>(&service_name, use_discovery)
            .await;
        self.service_name = Some(service_name);
        self.stub.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.stub.is_some()
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// 获取用户信息，失败时返回 `None`
    pub async fn get_user(&self, user_id: i64) -> Option<User> {
        match self.try_get_user(user_id).await {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::error!(user_id, error = %e, "Failed to get user");
                None
            }
        }
    }

    /// 创建用户，失败时返回 `None`
    pub async fn create_user(&self, name: &str) -> Option<User> {
        match self.try_create_user(name).await {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::error!(name = %name, error = %e, "Failed to create user");
                None
            }
        }
    }

    async fn try_get_user(&self, user_id: i64) -> Result<User, ClientError> {
        let mut stub = self.stub.clone().ok_or(ClientError::NotConnected)?;
        let request = UserRequest {
            id: user_id.to_string(),
        };
        match stub.get_user(request).await {
            Ok(response) => User::try_from(response.into_inner()),
            Err(status) => Err(self.call_failed(status).await),
        }
    }

    async fn try_create_user(&self, name: &str) -> Result<User, ClientError> {
        let mut stub = self.stub.clone().ok_or(ClientError::NotConnected)?;
        let request = CreateUserRequest {
            name: name.to_string(),
        };
        match stub.create_user(request).await {
            Ok(response) => User::try_from(response.into_inner()),
            Err(status) => Err(self.call_failed(status).await),
        }
    }

    // 传输层不可用时标记连接失效，下次获取存根会重连
    async fn call_failed(&self, status: Status) -> ClientError {
        if status.code() == Code::Unavailable
            && let Some(ref service_name) = self.service_name
        {
            self.manager.mark_dead(service_name).await;
        }
        ClientError::Grpc(status)
    }

    /// 关闭用户服务连接
    pub async fn close(&mut self) {
        self.stub = None;
        if let Some(ref service_name) = self.service_name {
            self.manager.close_service(service_name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_from_reply() {
        let user = User::try_from(UserReply {
            id: "42".to_string(),
            name: "Test User".to_string(),
        })
        .unwrap();
        assert_eq!(user, User { id: 42, name: "Test User".to_string() });

        let err = User::try_from(UserReply {
            id: "abc".to_string(),
            name: String::new(),
        })
        .unwrap_err();
        assert!(matches!(err, ClientError::MalformedReply(_)));
    }
}
