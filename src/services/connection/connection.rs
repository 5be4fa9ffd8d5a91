use std::any::Any;
use std::time::Instant;
use tonic::transport::Channel;

use super::stub::ServiceStub;
use super::types::ConnectionState;

// 某个服务名对应的活动连接：一个通道及其承载的存根
pub struct Connection {
    pub id: u64,
    pub service_name: String,
    pub target: String,
    pub channel: Channel,
    pub state: ConnectionState,
    pub created_at: Instant,
    stub: Box<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("service_name", &self.service_name)
            .field("target", &self.target)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new<S: ServiceStub>(id: u64, service_name: &str, target: String, channel: Channel) -> Self {
        let stub = S::from_channel(channel.clone());
        Self {
            id,
            service_name: service_name.to_string(),
            target,
            channel,
            state: ConnectionState::Ready,
            created_at: Instant::now(),
            stub: Box::new(stub),
        }
    }

    // 请求的存根类型与缓存一致时返回缓存的存根，否则在同一通道上构造
    pub fn stub<S: ServiceStub>(&self) -> S {
        match self.stub.downcast_ref::<S>() {
            Some(stub) => stub.clone(),
            None => S::from_channel(self.channel.clone()),
        }
    }

    pub fn mark_dead(&mut self) {
        self.state = ConnectionState::Dead;
    }

    pub fn is_dead(&self) -> bool {
        self.state == ConnectionState::Dead
    }
}
