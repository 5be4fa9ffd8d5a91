use thiserror::Error;

/// 注册中心错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned {status} for {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },

    #[error("Invalid registry address: {0}")]
    InvalidAddress(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Service not registered: {0}")]
    NotRegistered(String),

    #[error("Registry unavailable")]
    Unavailable,

    #[error("Configuration corrupt at key {key}: {source}")]
    ConfigCorrupt {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl RegistryError {
    /// 是否为注册中心明确返回的 404
    pub fn is_not_found(&self) -> bool {
        match self {
            RegistryError::Status { status, .. } => *status == 404,
            RegistryError::NotRegistered(_) => true,
            _ => false,
        }
    }
}
