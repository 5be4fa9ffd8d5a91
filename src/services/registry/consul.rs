use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::backend::RegistryBackend;
use super::error::RegistryError;
use super::types::{DiscoveredNode, ServiceRegistration, format_duration};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Consul HTTP API 后端
#[derive(Debug, Clone)]
pub struct ConsulBackend {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
    datacenter: Option<String>,
}

// PUT /v1/agent/service/register 的请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    name: &'a str,
    #[serde(rename = "ID")]
    id: &'a str,
    address: &'a str,
    port: u16,
    tags: &'a [String],
    meta: HashMap<&'static str, String>,
    check: AgentServiceCheck,
}

#[derive(Debug, Serialize)]
struct AgentServiceCheck {
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "DeregisterCriticalServiceAfter")]
    deregister_critical_service_after: String,
}

// GET /v1/health/service/{name} 的响应条目
#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node")]
    node: HealthNode,
    #[serde(rename = "Service")]
    service: HealthService,
}

#[derive(Debug, Deserialize)]
struct HealthNode {
    #[serde(rename = "Address", default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct HealthService {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

impl HealthEntry {
    // 服务地址为空时注册中心约定使用节点地址
    fn into_node(self) -> DiscoveredNode {
        let address = if self.service.address.is_empty() {
            self.node.address
        } else {
            self.service.address
        };
        DiscoveredNode::new(address, self.service.port)
    }
}

/// 规范化注册中心地址：补全协议并去掉末尾斜杠
pub fn normalize_address(address: &str) -> Result<String, RegistryError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::InvalidAddress(address.to_string()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| RegistryError::InvalidAddress(format!("{address}: {e}")))?;
    if url.host_str().is_none() {
        return Err(RegistryError::InvalidAddress(address.to_string()));
    }

    Ok(with_scheme.trim_end_matches('/').to_string())
}

impl ConsulBackend {
    pub fn new(
        address: &str,
        token: Option<String>,
        datacenter: Option<String>,
    ) -> Result<Self, RegistryError> {
        let http = HttpClient::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: normalize_address(address)?,
            token: token.filter(|t| !t.is_empty()),
            datacenter: datacenter.filter(|dc| !dc.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    // 构建带 token 与数据中心参数的请求
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self.http.request(method, self.url(path));
        if let Some(ref token) = self.token {
            request = request.header("X-Consul-Token", token);
        }
        if let Some(ref dc) = self.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        request
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response, RegistryError> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            status,
            path: path.to_string(),
            body,
        })
    }

    fn registration_body<'a>(registration: &'a ServiceRegistration) -> AgentServiceRegistration<'a> {
        let mut meta = HashMap::new();
        meta.insert("protocol", registration.protocol.to_string());

        AgentServiceRegistration {
            name: &registration.service_name,
            id: &registration.service_id,
            address: &registration.address,
            port: registration.port,
            tags: &registration.tags,
            meta,
            check: AgentServiceCheck {
                ttl: format_duration(registration.ttl),
                deregister_critical_service_after: format_duration(registration.deregister_after),
            },
        }
    }
}

#[tonic::async_trait]
impl RegistryBackend for ConsulBackend {
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), RegistryError> {
        let path = "/agent/service/register";
        let body = Self::registration_body(registration);
        self.send(self.request(Method::PUT, path).json(&body), path)
            .await?;
        Ok(())
    }

    async fn pass_ttl(&self, check_id: &str) -> Result<(), RegistryError> {
        let path = format!("/agent/check/pass/{check_id}");
        self.send(self.request(Method::PUT, &path), &path).await?;
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let path = format!("/agent/service/deregister/{service_id}");
        self.send(self.request(Method::PUT, &path), &path).await?;
        Ok(())
    }

    async fn service_exists(&self, service_id: &str) -> Result<bool, RegistryError> {
        let path = format!("/agent/service/{service_id}");
        match self.send(self.request(Method::GET, &path), &path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn healthy_instances(
        &self,
        service_name: &str,
    ) -> Result<Vec<DiscoveredNode>, RegistryError> {
        let path = format!("/health/service/{service_name}");
        let request = self
            .request(Method::GET, &path)
            .query(&[("passing", "true")]);
        let entries: Vec<HealthEntry> = self.send(request, &path).await?.json().await?;
        Ok(entries.into_iter().map(HealthEntry::into_node).collect())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        let path = format!("/kv/{key}");
        let request = self.request(Method::GET, &path).query(&[("raw", "")]);
        match self.send(request, &path).await {
            Ok(response) => Ok(Some(response.text().await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn kv_put(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        let path = format!("/kv/{key}");
        let response = self
            .send(self.request(Method::PUT, &path).body(value.to_string()), &path)
            .await?;
        let accepted: bool = response.json().await?;
        if accepted {
            Ok(())
        } else {
            Err(RegistryError::Status {
                status: StatusCode::OK.as_u16(),
                path,
                body: "false".to_string(),
            })
        }
    }

    async fn kv_keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        let path = format!("/kv/{prefix}");
        let request = self.request(Method::GET, &path).query(&[("keys", "")]);
        match self.send(request, &path).await {
            Ok(response) => Ok(response.json().await?),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
