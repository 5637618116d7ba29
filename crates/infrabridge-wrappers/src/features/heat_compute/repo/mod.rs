use crate::{Result, WrapperError};
use async_trait::async_trait;
use infrabridge_core::payload::ImageRef;
use infrabridge_core::{ResourceUtilisation, WrapperConfiguration};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_IDENTITY_PORT: u64 = 5000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResource {
    pub resource_name: String,
    pub resource_type: String,
    #[serde(default)]
    pub physical_resource_id: String,
    #[serde(default)]
    pub resource_status: String,
}

/// Orchestration, image and quota calls against one OpenStack tenant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackClient: Send + Sync {
    /// Returns the new stack id, or `None` when the VIM accepted nothing.
    async fn create_stack(&self, name: &str, template: Value) -> Result<Option<String>>;

    async fn stack_status(&self, name: &str, id: &str) -> Result<Option<String>>;

    async fn stack_template(&self, name: &str, id: &str) -> Result<Value>;

    async fn update_stack(&self, name: &str, id: &str, template: Value) -> Result<()>;

    async fn stack_resources(&self, name: &str, id: &str) -> Result<Vec<StackResource>>;

    /// Returns `"DELETED"` once the VIM accepted the deletion.
    async fn delete_stack(&self, name: &str, id: &str) -> Result<String>;

    async fn list_images(&self) -> Result<Vec<String>>;

    async fn upload_image(&self, image: &ImageRef) -> Result<()>;

    async fn limits(&self) -> Result<ResourceUtilisation>;
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    orchestration: String,
    image: String,
    compute: String,
}

/// Keystone v3 authenticated REST client for Heat, Glance and Nova.
pub struct HeatRestClient {
    http: Client,
    identity_url: String,
    username: String,
    password: String,
    domain: String,
    tenant: String,
    session: Mutex<Option<Session>>,
}

impl HeatRestClient {
    pub fn new(config: &WrapperConfiguration) -> Result<Self> {
        let tenant = config.config_str("tenant").ok_or_else(|| {
            WrapperError::Configuration("heat backends need configuration.tenant".to_string())
        })?;
        let port = config
            .config_u64("identity_port")
            .unwrap_or(DEFAULT_IDENTITY_PORT);
        let base = if config.endpoint.contains("://") {
            config.endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{port}", config.endpoint)
        };
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                WrapperError::Configuration(format!("failed to build http client: {e}"))
            })?;

        Ok(Self {
            http,
            identity_url: format!("{base}/v3/auth/tokens"),
            username: config.username.clone(),
            password: config.password.clone(),
            domain: if config.domain.is_empty() {
                "Default".to_string()
            } else {
                config.domain.clone()
            },
            tenant,
            session: Mutex::new(None),
        })
    }

    pub fn identity_url(&self) -> &str {
        &self.identity_url
    }

    async fn authenticate(&self) -> Result<Session> {
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.username,
                            "domain": { "name": self.domain },
                            "password": self.password
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.tenant,
                        "domain": { "name": self.domain }
                    }
                }
            }
        });

        let response = self
            .http
            .post(&self.identity_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WrapperError::Unreachable(format!("identity service: {e}")))?;

        if !response.status().is_success() {
            return Err(WrapperError::Unreachable(format!(
                "authentication refused with status {}",
                response.status()
            )));
        }

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| WrapperError::Unreachable("no token in identity reply".to_string()))?;
        let catalog: Value = response
            .json()
            .await
            .map_err(|e| WrapperError::Unreachable(format!("unreadable identity reply: {e}")))?;

        let session = Session {
            token,
            orchestration: public_endpoint(&catalog, "orchestration")?,
            image: public_endpoint(&catalog, "image")?,
            compute: public_endpoint(&catalog, "compute")?,
        };
        info!(tenant = %self.tenant, "Authenticated against keystone");
        Ok(session)
    }

    async fn session(&self) -> Result<Session> {
        let mut cached = self.session.lock().await;
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn request(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let session = self.session().await?;
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header("X-Auth-Token", &session.token);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| WrapperError::Unreachable(format!("{method} {url}: {e}")))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            *self.session.lock().await = None;
        }
        let text = response
            .text()
            .await
            .map_err(|e| WrapperError::Unreachable(format!("{method} {url}: {e}")))?;
        debug!(%method, %url, %status, "OpenStack call");

        if !status.is_success() {
            return Err(WrapperError::TerminalFailure(format!(
                "{method} {url} returned {status}: {text}"
            )));
        }
        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                WrapperError::TerminalFailure(format!("unreadable reply from {url}: {e}"))
            })?
        };
        Ok((status, value))
    }

    async fn stack_url(&self, name: &str, id: &str) -> Result<String> {
        Ok(format!(
            "{}/stacks/{name}/{id}",
            self.session().await?.orchestration
        ))
    }
}

fn public_endpoint(catalog: &Value, service_type: &str) -> Result<String> {
    catalog["token"]["catalog"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|service| service["type"] == service_type)
        .flat_map(|service| service["endpoints"].as_array().into_iter().flatten())
        .find(|endpoint| endpoint["interface"] == "public")
        .and_then(|endpoint| endpoint["url"].as_str())
        .map(|url| url.trim_end_matches('/').to_string())
        .ok_or_else(|| {
            WrapperError::Unreachable(format!("no public {service_type} endpoint in catalog"))
        })
}

fn limits_from(value: &Value) -> ResourceUtilisation {
    let absolute = &value["limits"]["absolute"];
    let field = |name: &str| absolute[name].as_i64().unwrap_or(-1);
    ResourceUtilisation {
        total_cores: field("maxTotalCores"),
        used_cores: field("totalCoresUsed"),
        total_memory: field("maxTotalRAMSize"),
        used_memory: field("totalRAMUsed"),
    }
}

#[async_trait]
impl StackClient for HeatRestClient {
    async fn create_stack(&self, name: &str, template: Value) -> Result<Option<String>> {
        let url = format!("{}/stacks", self.session().await?.orchestration);
        let body = json!({
            "stack_name": name,
            "template": template,
            "timeout_mins": 60
        });
        let (_, reply) = self.request(Method::POST, url, Some(body)).await?;
        Ok(reply["stack"]["id"].as_str().map(str::to_string))
    }

    async fn stack_status(&self, name: &str, id: &str) -> Result<Option<String>> {
        let url = self.stack_url(name, id).await?;
        let (_, reply) = self.request(Method::GET, url, None).await?;
        Ok(reply["stack"]["stack_status"].as_str().map(str::to_string))
    }

    async fn stack_template(&self, name: &str, id: &str) -> Result<Value> {
        let url = format!("{}/template", self.stack_url(name, id).await?);
        let (_, reply) = self.request(Method::GET, url, None).await?;
        Ok(reply)
    }

    async fn update_stack(&self, name: &str, id: &str, template: Value) -> Result<()> {
        let url = self.stack_url(name, id).await?;
        self.request(Method::PUT, url, Some(json!({ "template": template })))
            .await?;
        Ok(())
    }

    async fn stack_resources(&self, name: &str, id: &str) -> Result<Vec<StackResource>> {
        let url = format!("{}/resources?nested_depth=2", self.stack_url(name, id).await?);
        let (_, reply) = self.request(Method::GET, url, None).await?;
        serde_json::from_value(reply["resources"].clone())
            .map_err(|e| WrapperError::TerminalFailure(format!("unreadable resource list: {e}")))
    }

    async fn delete_stack(&self, name: &str, id: &str) -> Result<String> {
        let url = self.stack_url(name, id).await?;
        let (status, _) = self.request(Method::DELETE, url, None).await?;
        Ok(if status == StatusCode::NO_CONTENT {
            "DELETED".to_string()
        } else {
            status.to_string()
        })
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        let url = format!("{}/v2/images", self.session().await?.image);
        let (_, reply) = self.request(Method::GET, url, None).await?;
        Ok(reply["images"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|image| image["name"].as_str().map(str::to_string))
            .collect())
    }

    async fn upload_image(&self, image: &ImageRef) -> Result<()> {
        let base = format!("{}/v2/images", self.session().await?.image);
        let body = json!({
            "name": image.id,
            "disk_format": "qcow2",
            "container_format": "bare",
            "visibility": "public"
        });
        let (_, created) = self.request(Method::POST, base.clone(), Some(body)).await?;
        let image_id = created["id"]
            .as_str()
            .ok_or_else(|| WrapperError::TerminalFailure("image service returned no id".to_string()))?;

        let import = json!({ "method": { "name": "web-download", "uri": image.url } });
        self.request(Method::POST, format!("{base}/{image_id}/import"), Some(import))
            .await?;
        info!(image = %image.id, "Image import requested");
        Ok(())
    }

    async fn limits(&self) -> Result<ResourceUtilisation> {
        let url = format!("{}/limits", self.session().await?.compute);
        let (_, reply) = self.request(Method::GET, url, None).await?;
        Ok(limits_from(&reply))
    }
}
