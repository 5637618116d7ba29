pub mod factory;
pub mod features;
pub mod monitor;
pub mod repository;
pub mod status;

use async_trait::async_trait;
use infrabridge_core::payload::{
    CloudServiceDeployPayload, FunctionDeployPayload, FunctionScalePayload, ImageRef,
    NetworkConfigurePayload,
};
use infrabridge_core::{CoreError, ResourceUtilisation, SubnetPools, WrapperConfiguration};
use repository::InfrastructureRepository;
use std::sync::Arc;
use status::StatusHub;
use thiserror::Error;

pub use factory::{WrapperConstructor, WrapperFactory};
pub use monitor::{BackoffPolicy, DeploymentMonitor, MonitorError, MonitorState, StackAction};
pub use repository::InMemoryInfrastructureRepository;
pub use status::Subscription;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WrapperError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    #[error("Backend failure: {0}")]
    TerminalFailure(String),
    #[error("Resource exhaustion: {0}")]
    ResourceExhausted(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<MonitorError> for WrapperError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Failed(msg) => WrapperError::TerminalFailure(msg),
            MonitorError::Timeout(msg) => WrapperError::Timeout(msg),
            MonitorError::Unreachable(msg) => WrapperError::Unreachable(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, WrapperError>;

/// Shared state a wrapper needs besides its own configuration.
#[derive(Clone)]
pub struct WrapperContext {
    pub repository: Arc<dyn InfrastructureRepository>,
    pub status: StatusHub,
    pub subnets: Arc<SubnetPools>,
}

impl WrapperContext {
    pub fn new(
        repository: Arc<dyn InfrastructureRepository>,
        status: StatusHub,
        subnets: Arc<SubnetPools>,
    ) -> Self {
        Self {
            repository,
            status,
            subnets,
        }
    }

    /// Context backed by an in-memory repository, a fresh hub and empty pools.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryInfrastructureRepository::new()),
            StatusHub::new(),
            Arc::new(SubnetPools::new()),
        )
    }
}

/// Driver handle for one configured VIM or WIM.
pub trait Wrapper: Send + Sync {
    fn config(&self) -> &WrapperConfiguration;

    fn as_compute(&self) -> Option<&dyn Compute> {
        None
    }

    fn as_network(&self) -> Option<&dyn Network> {
        None
    }

    fn as_wan(&self) -> Option<&dyn Wan> {
        None
    }
}

/// Compute capability.
///
/// `deploy_function`, `deploy_cloud_service`, `scale_function` and
/// `remove_service` return once the work is submitted. Their outcome arrives
/// later as a [`infrabridge_core::StatusUpdate`] on the [`StatusHub`] for `sid`.
#[async_trait]
pub trait Compute: Send + Sync {
    async fn deploy_function(&self, data: FunctionDeployPayload, sid: &str) -> Result<()>;

    async fn deploy_cloud_service(&self, data: CloudServiceDeployPayload, sid: &str)
        -> Result<()>;

    async fn prepare_service(&self, instance_id: &str) -> Result<bool>;

    async fn remove_service(&self, instance_id: &str, sid: &str) -> Result<()>;

    async fn scale_function(&self, data: FunctionScalePayload, sid: &str) -> Result<()>;

    async fn list_images(&self) -> Result<Vec<String>>;

    async fn is_image_stored(&self, image: &ImageRef) -> Result<bool>;

    async fn upload_image(&self, image: &ImageRef) -> Result<()>;

    async fn get_resource_utilisation(&self) -> Result<ResourceUtilisation>;
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn configure_networking(&self, data: &NetworkConfigurePayload) -> Result<()>;

    async fn deconfigure_networking(&self, instance_id: &str) -> Result<()>;
}

#[async_trait]
pub trait Wan: Send + Sync {
    async fn configure_network(
        &self,
        instance_id: &str,
        ingress: Option<&str>,
        egress: Option<&str>,
        endpoints: &[String],
    ) -> Result<bool>;

    async fn remove_net_configuration(&self, instance_id: &str) -> Result<bool>;
}
