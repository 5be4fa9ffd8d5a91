use tonic::transport::Channel;

use crate::user::user_service_client::UserServiceClient;

/// 可由通道构造的 RPC 客户端存根
pub trait ServiceStub: Clone + Send + Sync + 'static {
    fn from_channel(channel: Channel) -> Self;
}

impl ServiceStub for Channel {
    fn from_channel(channel: Channel) -> Self {
        channel
    }
}

impl ServiceStub for UserServiceClient<Channel> {
    fn from_channel(channel: Channel) -> Self {
        UserServiceClient::new(channel)
    }
}
