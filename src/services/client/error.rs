use tonic::Status;

/// 业务客户端错误类型，调用方只会看到 `None`
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("gRPC client is not connected")]
    NotConnected,
    #[error("gRPC error: {0}")]
    Grpc(#[from] Status),
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}
