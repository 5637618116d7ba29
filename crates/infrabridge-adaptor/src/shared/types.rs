use serde::{Deserialize, Serialize};
use std::fmt;

pub use infrabridge_core::{ApiResponse, Message, RequestStatus, StatusUpdate, WrapperCategory};

pub const REGISTER_TOPIC: &str = "platform.management.plugin.register";
pub const DEREGISTER_TOPIC: &str = "platform.management.plugin.deregister";
pub const INFRASTRUCTURE_PREFIX: &str = "infrastructure.";

pub fn heartbeat_topic(uuid: &str) -> String {
    format!("platform.management.plugin.{uuid}.heartbeat")
}

/// Lifecycle state of the adaptor as seen by the plugin manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdaptorState {
    Ready,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for AdaptorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdaptorState::Ready => "READY",
            AdaptorState::Running => "RUNNING",
            AdaptorState::Stopped => "STOPPED",
            AdaptorState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Terminal reply of one API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReply {
    pub status: RequestStatus,
    pub body: String,
}

impl CallReply {
    pub fn new(status: RequestStatus, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn completed() -> Self {
        ApiResponse::completed().into()
    }

    pub fn error(message: impl Into<String>) -> Self {
        ApiResponse::error(message).into()
    }

    pub fn warning(message: impl Into<String>) -> Self {
        ApiResponse::warning(message).into()
    }
}

impl From<ApiResponse> for CallReply {
    fn from(response: ApiResponse) -> Self {
        Self::new(response.request_status, response.to_json())
    }
}
