pub mod user {
    tonic::include_proto!("user");
}
pub mod config;
pub mod server;
pub mod services;
