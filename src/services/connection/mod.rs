pub mod connection;
pub mod manager;
pub mod stub;
pub mod types;

pub use connection::*;
pub use manager::*;
pub use stub::*;
pub use types::*;
