use crate::shared::error::{AdaptorError, AdaptorResult};
use infrabridge_core::{WrapperCategory, WrapperConfiguration};
use infrabridge_wrappers::repository::{InfrastructureRepository, WanLink};
use infrabridge_wrappers::{Wrapper, WrapperContext, WrapperFactory};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registered VIMs and WIMs.
///
/// Configurations live in the repository. Wrappers are rebuilt from them on
/// every lookup, so one registry can be shared by every concurrent call.
pub struct BackendRegistry {
    factory: WrapperFactory,
    context: WrapperContext,
}

impl BackendRegistry {
    pub fn new(factory: WrapperFactory, context: WrapperContext) -> Self {
        Self { factory, context }
    }

    pub fn context(&self) -> &WrapperContext {
        &self.context
    }

    fn repository(&self) -> &Arc<dyn InfrastructureRepository> {
        &self.context.repository
    }

    /// Builds the driver for `config` without touching the repository.
    pub fn create(&self, config: WrapperConfiguration) -> AdaptorResult<Arc<dyn Wrapper>> {
        Ok(self.factory.create(config, self.context.clone())?)
    }

    /// Validates and persists a backend. Network backends are linked to the
    /// compute backend named by `configuration.compute_uuid`.
    pub async fn register(&self, config: WrapperConfiguration) -> AdaptorResult<String> {
        let compute_ref = match config.category {
            WrapperCategory::Network => Some(self.attachable_compute(&config).await?),
            _ => None,
        };
        self.create(config.clone())?;

        self.repository().write_backend(&config).await?;
        if let Some(compute_uuid) = compute_ref {
            if let Err(e) = self
                .repository()
                .write_network_link(&compute_uuid, &config.uuid)
                .await
            {
                warn!(backend = %config.uuid, compute = %compute_uuid, error = %e, "Unable to link network backend");
                if let Err(cleanup) = self.repository().remove_backend(&config.uuid).await {
                    warn!(backend = %config.uuid, error = %cleanup, "Unable to drop unlinked network backend");
                }
                return Err(e.into());
            }
        }
        info!(
            backend = %config.uuid,
            category = %config.category,
            vendor = %config.vendor,
            "Backend registered"
        );
        Ok(config.uuid)
    }

    async fn attachable_compute(&self, config: &WrapperConfiguration) -> AdaptorResult<String> {
        let compute_uuid = config.config_str("compute_uuid").ok_or_else(|| {
            AdaptorError::Parse("network backend without configuration.compute_uuid".to_string())
        })?;
        match self.repository().read_backend(&compute_uuid).await? {
            Some(compute) if compute.category == WrapperCategory::Compute => Ok(compute_uuid),
            _ => Err(AdaptorError::BackendNotFound(compute_uuid)),
        }
    }

    /// Rebuilds the wrapper of a registered backend.
    pub async fn lookup(&self, uuid: &str) -> AdaptorResult<Option<Arc<dyn Wrapper>>> {
        let Some(config) = self.repository().read_backend(uuid).await? else {
            debug!(backend = %uuid, "Backend not registered");
            return Ok(None);
        };
        self.create(config).map(Some)
    }

    pub async fn lookup_category(
        &self,
        uuid: &str,
        category: WrapperCategory,
    ) -> AdaptorResult<Option<Arc<dyn Wrapper>>> {
        Ok(self
            .lookup(uuid)
            .await?
            .filter(|wrapper| wrapper.config().category == category))
    }

    pub async fn list(&self, category: WrapperCategory) -> AdaptorResult<Vec<String>> {
        Ok(self.repository().list_backends(category).await?)
    }

    pub async fn configuration(&self, uuid: &str) -> AdaptorResult<Option<WrapperConfiguration>> {
        Ok(self.repository().read_backend(uuid).await?)
    }

    /// Deletes a backend and every link naming it. Returns false for an unknown uuid.
    pub async fn remove(&self, uuid: &str) -> AdaptorResult<bool> {
        let Some(config) = self.repository().read_backend(uuid).await? else {
            return Ok(false);
        };
        let removed = self.repository().remove_backend(uuid).await?;
        if config.category == WrapperCategory::Compute {
            if let Err(e) = self.context.subnets.remove_pool(uuid) {
                warn!(backend = %uuid, error = %e, "Unable to drop subnet pool");
            }
        }
        info!(backend = %uuid, category = %config.category, "Backend removed");
        Ok(removed)
    }

    /// Network backend serving `compute_uuid`.
    pub async fn network_for_compute(
        &self,
        compute_uuid: &str,
    ) -> AdaptorResult<Option<Arc<dyn Wrapper>>> {
        match self.repository().network_for_compute(compute_uuid).await? {
            Some(network_uuid) => self.lookup(&network_uuid).await,
            None => Ok(None),
        }
    }

    pub async fn wan_link(&self, compute_uuid: &str) -> AdaptorResult<Option<WanLink>> {
        Ok(self.repository().wan_for_compute(compute_uuid).await?)
    }

    /// Links compute backend `vim_uuid`, reachable at `vim_address`, to WAN backend `wim_uuid`.
    pub async fn attach_to_wan(
        &self,
        wim_uuid: &str,
        vim_uuid: &str,
        vim_address: &str,
    ) -> AdaptorResult<()> {
        let wim = self.configuration(wim_uuid).await?;
        if !matches!(wim, Some(ref c) if c.category == WrapperCategory::Wan) {
            return Err(AdaptorError::BackendNotFound(wim_uuid.to_string()));
        }
        let vim = self.configuration(vim_uuid).await?;
        if !matches!(vim, Some(ref c) if c.category == WrapperCategory::Compute) {
            return Err(AdaptorError::BackendNotFound(vim_uuid.to_string()));
        }
        self.repository()
            .write_wan_link(vim_uuid, wim_uuid, vim_address)
            .await?;
        info!(wim = %wim_uuid, vim = %vim_uuid, "VIM attached to WIM");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrabridge_wrappers::repository::{InstancePlacement, StackRecord};
    use infrabridge_wrappers::WrapperError;
    use serde_json::json;

    fn registry() -> BackendRegistry {
        BackendRegistry::new(WrapperFactory::with_defaults(), WrapperContext::in_memory())
    }

    fn compute() -> WrapperConfiguration {
        WrapperConfiguration::new(WrapperCategory::Compute, "mock", "10.0.0.1")
    }

    mockall::mock! {
        Repository {}

        #[async_trait::async_trait]
        impl InfrastructureRepository for Repository {
            async fn write_backend(&self, config: &WrapperConfiguration) -> infrabridge_wrappers::Result<()>;
            async fn read_backend(&self, uuid: &str) -> infrabridge_wrappers::Result<Option<WrapperConfiguration>>;
            async fn list_backends(&self, category: WrapperCategory) -> infrabridge_wrappers::Result<Vec<String>>;
            async fn remove_backend(&self, uuid: &str) -> infrabridge_wrappers::Result<bool>;
            async fn write_network_link(&self, compute_uuid: &str, network_uuid: &str) -> infrabridge_wrappers::Result<()>;
            async fn network_for_compute(&self, compute_uuid: &str) -> infrabridge_wrappers::Result<Option<String>>;
            async fn write_wan_link(&self, compute_uuid: &str, wan_uuid: &str, compute_address: &str) -> infrabridge_wrappers::Result<()>;
            async fn wan_for_compute(&self, compute_uuid: &str) -> infrabridge_wrappers::Result<Option<WanLink>>;
            async fn write_service_instance(&self, record: StackRecord) -> infrabridge_wrappers::Result<()>;
            async fn read_service_instance(&self, instance_id: &str, backend_uuid: &str) -> infrabridge_wrappers::Result<Option<StackRecord>>;
            async fn backends_for_instance(&self, instance_id: &str) -> infrabridge_wrappers::Result<Vec<String>>;
            async fn remove_service_instance(&self, instance_id: &str, backend_uuid: &str) -> infrabridge_wrappers::Result<bool>;
            async fn write_function_instance(&self, function_id: &str, placement: InstancePlacement) -> infrabridge_wrappers::Result<()>;
            async fn read_function_instance(&self, function_id: &str) -> infrabridge_wrappers::Result<Option<InstancePlacement>>;
            async fn write_cloud_service_instance(&self, cloud_service_id: &str, placement: InstancePlacement) -> infrabridge_wrappers::Result<()>;
            async fn read_cloud_service_instance(&self, cloud_service_id: &str) -> infrabridge_wrappers::Result<Option<InstancePlacement>>;
        }
    }

    #[tokio::test]
    async fn test_failed_network_link_drops_backend_row() {
        let compute = compute();
        let compute_uuid = compute.uuid.clone();
        let network = WrapperConfiguration::new(WrapperCategory::Network, "mock", "10.0.0.2")
            .with_configuration(json!({ "compute_uuid": compute_uuid }));
        let network_uuid = network.uuid.clone();

        let mut repository = MockRepository::new();
        repository
            .expect_read_backend()
            .returning(move |_| Ok(Some(compute.clone())));
        repository.expect_write_backend().times(1).returning(|_| Ok(()));
        repository
            .expect_write_network_link()
            .times(1)
            .returning(|_, _| Err(WrapperError::Storage("link table unavailable".into())));
        repository
            .expect_remove_backend()
            .withf(move |uuid| uuid == network_uuid)
            .times(1)
            .returning(|_| Ok(true));

        let context = WrapperContext::new(
            Arc::new(repository),
            infrabridge_wrappers::status::StatusHub::new(),
            Arc::new(infrabridge_core::SubnetPools::new()),
        );
        let registry = BackendRegistry::new(WrapperFactory::with_defaults(), context);
        let err = registry.register(network).await.unwrap_err();
        assert!(matches!(err, AdaptorError::Wrapper(WrapperError::Storage(_))));
    }

    #[tokio::test]
    async fn test_register_then_lookup_matches_capabilities() {
        let registry = registry();
        let uuid = registry.register(compute()).await.unwrap();

        let wrapper = registry.lookup(&uuid).await.unwrap().unwrap();
        assert!(wrapper.as_compute().is_some());
        assert!(wrapper.as_network().is_none());
        assert_eq!(registry.list(WrapperCategory::Compute).await.unwrap(), vec![uuid]);
    }

    #[tokio::test]
    async fn test_unknown_vendor_leaves_no_row() {
        let registry = registry();
        let config = WrapperConfiguration::new(WrapperCategory::Compute, "vmware", "10.0.0.1");
        let uuid = config.uuid.clone();

        let err = registry.register(config).await.unwrap_err();
        assert!(matches!(
            err,
            AdaptorError::Wrapper(WrapperError::Configuration(_))
        ));
        assert!(registry.lookup(&uuid).await.unwrap().is_none());
        assert!(registry.list(WrapperCategory::Compute).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_then_lookup_is_none() {
        let registry = registry();
        let uuid = registry.register(compute()).await.unwrap();

        assert!(registry.remove(&uuid).await.unwrap());
        assert!(registry.lookup(&uuid).await.unwrap().is_none());
        assert!(!registry.remove(&uuid).await.unwrap());
    }

    #[tokio::test]
    async fn test_network_backend_links_to_compute() {
        let registry = registry();
        let compute_uuid = registry.register(compute()).await.unwrap();
        let network = WrapperConfiguration::new(WrapperCategory::Network, "mock", "10.0.0.2")
            .with_configuration(json!({ "compute_uuid": compute_uuid }));
        let network_uuid = registry.register(network).await.unwrap();

        let attached = registry
            .network_for_compute(&compute_uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attached.config().uuid, network_uuid);

        registry.remove(&compute_uuid).await.unwrap();
        assert!(registry
            .network_for_compute(&compute_uuid)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_network_backend_needs_known_compute() {
        let registry = registry();
        let network = WrapperConfiguration::new(WrapperCategory::Network, "mock", "10.0.0.2")
            .with_configuration(json!({ "compute_uuid": "missing" }));
        assert!(matches!(
            registry.register(network).await,
            Err(AdaptorError::BackendNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_to_wan_checks_categories() {
        let registry = registry();
        let vim = registry.register(compute()).await.unwrap();
        let wim = registry
            .register(WrapperConfiguration::new(
                WrapperCategory::Wan,
                "mock",
                "10.0.0.3",
            ))
            .await
            .unwrap();

        assert!(registry.attach_to_wan(&vim, &wim, "10.1.0.0/16").await.is_err());
        registry
            .attach_to_wan(&wim, &vim, "10.1.0.0/16")
            .await
            .unwrap();
        let link = registry.wan_link(&vim).await.unwrap().unwrap();
        assert_eq!(link.wan_uuid, wim);
        assert_eq!(link.compute_address, "10.1.0.0/16");
    }

    #[tokio::test]
    async fn test_lookup_category_filters() {
        let registry = registry();
        let uuid = registry.register(compute()).await.unwrap();
        assert!(registry
            .lookup_category(&uuid, WrapperCategory::Wan)
            .await
            .unwrap()
            .is_none());
    }
}
