pub mod payload;
pub mod subnet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use subnet::{SubnetAllocator, SubnetPools};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),
    #[error("Resource exhaustion: {0}")]
    ResourceExhausted(String),
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Envelope carried by the service platform bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub body: String,
    pub content_type: String,
    pub topic: String,
    pub sid: String,
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new(
        body: impl Into<String>,
        content_type: impl Into<String>,
        topic: impl Into<String>,
        sid: impl Into<String>,
        reply_to: Option<String>,
    ) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            topic: topic.into(),
            sid: sid.into(),
            reply_to,
        }
    }

    /// A JSON message with a freshly generated sid.
    pub fn request(topic: impl Into<String>, body: impl Into<String>) -> Self {
        let topic = topic.into();
        Self::new(
            body,
            JSON_CONTENT_TYPE,
            topic.clone(),
            new_sid(),
            Some(topic),
        )
    }

    /// Topic the terminal reply for this message is published on.
    pub fn reply_topic(&self) -> &str {
        self.reply_to.as_deref().unwrap_or(&self.topic)
    }

    pub fn reply(&self, body: impl Into<String>) -> Message {
        Message::new(
            body,
            JSON_CONTENT_TYPE,
            self.reply_topic().to_string(),
            self.sid.clone(),
            None,
        )
    }

    pub fn parse_body<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| CoreError::Parse(e.to_string()))
    }
}

pub fn new_sid() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    Success,
    Error,
}

/// Asynchronous completion signal emitted by a backend driver for one sid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub sid: String,
    pub status: UpdateStatus,
    pub body: String,
}

impl StatusUpdate {
    pub fn success(sid: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            status: UpdateStatus::Success,
            body: body.into(),
        }
    }

    pub fn error(sid: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            status: UpdateStatus::Error,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UpdateStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Completed,
    Error,
    Warning,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Error => "ERROR",
            RequestStatus::Warning => "WARNING",
        };
        f.write_str(s)
    }
}

/// Terminal reply body for every domain API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub request_status: RequestStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl ApiResponse {
    pub fn completed() -> Self {
        Self {
            request_status: RequestStatus::Completed,
            message: String::new(),
            uuid: None,
        }
    }

    pub fn completed_with_uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            ..Self::completed()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            request_status: RequestStatus::Error,
            message: message.into(),
            uuid: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            request_status: RequestStatus::Warning,
            message: message.into(),
            uuid: None,
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of strings and a unit enum always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"request_status\":\"{}\",\"message\":\"\"}}",
                self.request_status
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperCategory {
    Compute,
    Network,
    Wan,
}

impl WrapperCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            WrapperCategory::Compute => "compute",
            WrapperCategory::Network => "network",
            WrapperCategory::Wan => "wan",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "compute" => Some(WrapperCategory::Compute),
            "network" => Some(WrapperCategory::Network),
            "wan" => Some(WrapperCategory::Wan),
            _ => None,
        }
    }
}

impl fmt::Display for WrapperCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted description of one registered backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperConfiguration {
    pub uuid: String,
    pub category: WrapperCategory,
    pub vendor: String,
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub configuration: serde_json::Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    pub created_at: DateTime<Utc>,
}

impl WrapperConfiguration {
    pub fn new(
        category: WrapperCategory,
        vendor: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            category,
            vendor: vendor.into().to_ascii_lowercase(),
            endpoint: endpoint.into(),
            username: String::new(),
            password: String::new(),
            domain: String::new(),
            configuration: serde_json::Value::Object(serde_json::Map::new()),
            name: String::new(),
            city: String::new(),
            country: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_location(
        mut self,
        name: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        self.name = name.into();
        self.city = city.into();
        self.country = country.into();
        self
    }

    /// Reads a string key of the vendor configuration blob. Numbers are rendered as text.
    pub fn config_str(&self, key: &str) -> Option<String> {
        match self.configuration.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.configuration.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Tenant address space in CIDR notation, when the blob declares one.
    pub fn tenant_cidr(&self) -> Option<String> {
        let net = self.config_str("tenant_private_net_id")?;
        let length = self.config_str("tenant_private_net_length")?;
        Some(format!("{net}/{length}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUtilisation {
    pub total_cores: i64,
    pub used_cores: i64,
    pub total_memory: i64,
    pub used_memory: i64,
}

impl ResourceUtilisation {
    /// Placeholder reported for a backend that could not be queried.
    pub fn unavailable() -> Self {
        Self {
            total_cores: -1,
            used_cores: -1,
            total_memory: -1,
            used_memory: -1,
        }
    }
}

/// One row of a `compute.list` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResources {
    pub vim_uuid: String,
    pub vim_name: String,
    pub vim_city: String,
    pub vim_domain: String,
    pub vim_type: String,
    pub vim_endpoint: String,
    pub core_total: i64,
    pub core_used: i64,
    pub memory_total: i64,
    pub memory_used: i64,
}

impl BackendResources {
    pub fn new(config: &WrapperConfiguration, resources: ResourceUtilisation) -> Self {
        Self {
            vim_uuid: config.uuid.clone(),
            vim_name: config.name.clone(),
            vim_city: config.city.clone(),
            vim_domain: config.domain.clone(),
            vim_type: config.vendor.clone(),
            vim_endpoint: config.endpoint.clone(),
            core_total: resources.total_cores,
            core_used: resources.used_cores,
            memory_total: resources.total_memory,
            memory_used: resources.used_memory,
        }
    }
}

/// Summary row of a `network.list` / `wan.list` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSummary {
    pub uuid: String,
    pub name: String,
    pub vendor: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<String>,
}
