use crate::{Result, Wan, Wrapper, WrapperContext};
use async_trait::async_trait;
use infrabridge_core::WrapperConfiguration;
use std::sync::Arc;
use tracing::info;

/// WAN driver that reports every flow as installed.
pub struct MockWanWrapper {
    config: WrapperConfiguration,
}

impl MockWanWrapper {
    pub fn new(config: WrapperConfiguration, _context: WrapperContext) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn construct(
        config: WrapperConfiguration,
        context: WrapperContext,
    ) -> Result<Arc<dyn Wrapper>> {
        Ok(Arc::new(Self::new(config, context)?))
    }
}

impl Wrapper for MockWanWrapper {
    fn config(&self) -> &WrapperConfiguration {
        &self.config
    }

    fn as_wan(&self) -> Option<&dyn Wan> {
        Some(self)
    }
}

#[async_trait]
impl Wan for MockWanWrapper {
    async fn configure_network(
        &self,
        instance_id: &str,
        ingress: Option<&str>,
        egress: Option<&str>,
        endpoints: &[String],
    ) -> Result<bool> {
        info!(
            backend = %self.config.uuid,
            instance = %instance_id,
            ingress = ingress.unwrap_or("*"),
            egress = egress.unwrap_or("*"),
            endpoints = %endpoints.join(","),
            "WAN flow installed"
        );
        Ok(true)
    }

    async fn remove_net_configuration(&self, instance_id: &str) -> Result<bool> {
        info!(backend = %self.config.uuid, instance = %instance_id, "WAN configuration removed");
        Ok(true)
    }
}
