pub mod repo;
pub mod service;
pub mod template;

use crate::features::{deploy_update, removal_update};
use crate::monitor::BackoffPolicy;
use crate::{Compute, Result, Wrapper, WrapperContext, WrapperError};
use async_trait::async_trait;
use infrabridge_core::payload::{
    CloudServiceDeployPayload, FunctionDeployPayload, FunctionScalePayload, ImageRef,
};
use infrabridge_core::{ResourceUtilisation, StatusUpdate, WrapperConfiguration};
use repo::{HeatRestClient, StackClient};
use service::HeatComputeService;
use std::sync::Arc;
use tracing::{error, info};

/// Compute driver for OpenStack VIMs, deploying services as Heat stacks.
pub struct HeatComputeWrapper {
    config: WrapperConfiguration,
    service: HeatComputeService,
}

impl HeatComputeWrapper {
    pub fn new(config: WrapperConfiguration, context: WrapperContext) -> Result<Self> {
        let client = Arc::new(HeatRestClient::new(&config)?);
        Ok(Self::with_client(config, context, client, BackoffPolicy::default()))
    }

    pub fn with_client(
        config: WrapperConfiguration,
        context: WrapperContext,
        client: Arc<dyn StackClient>,
        policy: BackoffPolicy,
    ) -> Self {
        let service = HeatComputeService::new(config.clone(), context, client, policy);
        Self { config, service }
    }

    pub fn construct(
        config: WrapperConfiguration,
        context: WrapperContext,
    ) -> Result<Arc<dyn Wrapper>> {
        Ok(Arc::new(Self::new(config, context)?))
    }

    fn report<F>(&self, sid: &str, work: F)
    where
        F: std::future::Future<Output = Result<StatusUpdate>> + Send + 'static,
    {
        let sid = sid.to_string();
        let status = self.service.context().status.clone();
        tokio::spawn(async move {
            let update = match work.await {
                Ok(update) => update,
                Err(e) => {
                    error!(sid = %sid, error = %e, "Heat operation failed");
                    StatusUpdate::error(&sid, e.to_string())
                }
            };
            status.publish(update);
        });
    }
}

impl Wrapper for HeatComputeWrapper {
    fn config(&self) -> &WrapperConfiguration {
        &self.config
    }

    fn as_compute(&self) -> Option<&dyn Compute> {
        Some(self)
    }
}

#[async_trait]
impl Compute for HeatComputeWrapper {
    async fn deploy_function(&self, data: FunctionDeployPayload, sid: &str) -> Result<()> {
        let service = self.service.clone();
        let owned_sid = sid.to_string();
        self.report(sid, async move {
            let response = service.deploy_function(data).await?;
            Ok(deploy_update(&owned_sid, &response))
        });
        Ok(())
    }

    async fn deploy_cloud_service(
        &self,
        _data: CloudServiceDeployPayload,
        _sid: &str,
    ) -> Result<()> {
        Err(WrapperError::Unsupported(
            "cloud services cannot be deployed on Heat VIMs".to_string(),
        ))
    }

    async fn prepare_service(&self, instance_id: &str) -> Result<bool> {
        self.service.prepare_service(instance_id).await
    }

    async fn remove_service(&self, instance_id: &str, sid: &str) -> Result<()> {
        let service = self.service.clone();
        let instance_id = instance_id.to_string();
        let owned_sid = sid.to_string();
        let uuid = self.config.uuid.clone();
        self.report(sid, async move {
            service.remove_service(&instance_id).await?;
            Ok(removal_update(&owned_sid, &uuid))
        });
        Ok(())
    }

    async fn scale_function(&self, data: FunctionScalePayload, sid: &str) -> Result<()> {
        let service = self.service.clone();
        let owned_sid = sid.to_string();
        self.report(sid, async move {
            let response = service.scale_function(data).await?;
            Ok(deploy_update(&owned_sid, &response))
        });
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        self.service.client().list_images().await
    }

    async fn is_image_stored(&self, image: &ImageRef) -> Result<bool> {
        Ok(self.list_images().await?.contains(&image.id))
    }

    async fn upload_image(&self, image: &ImageRef) -> Result<()> {
        info!(backend = %self.config.uuid, image = %image.id, url = %image.url, "Uploading image");
        self.service.client().upload_image(image).await
    }

    async fn get_resource_utilisation(&self) -> Result<ResourceUtilisation> {
        self.service.client().limits().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::heat_compute::repo::MockStackClient;
    use crate::repository::StackRecord;
    use infrabridge_core::payload::RemoveBranchOutcome;
    use infrabridge_core::WrapperCategory;
    use std::time::Duration;

    fn wrapper(client: MockStackClient) -> (HeatComputeWrapper, WrapperContext) {
        let context = WrapperContext::in_memory();
        let config = WrapperConfiguration::new(WrapperCategory::Compute, "heat", "10.100.32.200")
            .with_configuration(serde_json::json!({"tenant": "op"}));
        let wrapper = HeatComputeWrapper::with_client(
            config,
            context.clone(),
            Arc::new(client),
            BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(40), 3),
        );
        (wrapper, context)
    }

    #[test]
    fn test_construct_requires_tenant() {
        let config = WrapperConfiguration::new(WrapperCategory::Compute, "heat", "10.0.0.1");
        assert!(matches!(
            HeatComputeWrapper::new(config, WrapperContext::in_memory()),
            Err(WrapperError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_cloud_services_unsupported() {
        let (wrapper, _) = wrapper(MockStackClient::new());
        let result = wrapper
            .deploy_cloud_service(
                CloudServiceDeployPayload {
                    vim_uuid: wrapper.config.uuid.clone(),
                    service_instance_id: "svc".into(),
                    csd: serde_json::json!({}),
                },
                "sid",
            )
            .await;
        assert!(matches!(result, Err(WrapperError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_image_checks_use_glance_listing() {
        let mut client = MockStackClient::new();
        client
            .expect_list_images()
            .returning(|| Ok(vec!["ubuntu".to_string()]));
        let (wrapper, _) = wrapper(client);

        let image = ImageRef {
            id: "ubuntu".into(),
            url: "http://img".into(),
            checksum: None,
        };
        assert!(wrapper.is_image_stored(&image).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_emits_branch_outcome() {
        let mut client = MockStackClient::new();
        client
            .expect_delete_stack()
            .returning(|_, _| Ok("DELETED".to_string()));
        let (wrapper, context) = wrapper(client);
        context
            .repository
            .write_service_instance(StackRecord {
                instance_id: "svc".into(),
                backend_uuid: wrapper.config.uuid.clone(),
                stack_id: "stack-1".into(),
                stack_name: "SonataService-svc".into(),
            })
            .await
            .unwrap();

        let mut subscription = context.status.subscribe("sid-r");
        wrapper.remove_service("svc", "sid-r").await.unwrap();
        let update = subscription.recv().await.unwrap();
        assert!(update.is_success());
        let outcome: RemoveBranchOutcome = serde_json::from_str(&update.body).unwrap();
        assert_eq!(outcome.wrapper_uuid, wrapper.config.uuid);
    }

    #[tokio::test]
    async fn test_unreachable_backend_becomes_error_update() {
        let mut client = MockStackClient::new();
        client
            .expect_stack_template()
            .returning(|_, _| Err(WrapperError::Unreachable("connection refused".into())));
        let (wrapper, context) = wrapper(client);
        context
            .repository
            .write_service_instance(StackRecord {
                instance_id: "svc".into(),
                backend_uuid: wrapper.config.uuid.clone(),
                stack_id: "stack-1".into(),
                stack_name: "SonataService-svc".into(),
            })
            .await
            .unwrap();

        let mut subscription = context.status.subscribe("sid-d");
        wrapper
            .deploy_function(
                FunctionDeployPayload {
                    vim_uuid: wrapper.config.uuid.clone(),
                    service_instance_id: "svc".into(),
                    vnfd: serde_json::json!({"virtual_deployment_units": [{"id": "v"}]}),
                    public_key: None,
                },
                "sid-d",
            )
            .await
            .unwrap();

        let update = subscription.recv().await.unwrap();
        assert!(!update.is_success());
        assert!(update.body.contains("connection refused"));
    }
}
