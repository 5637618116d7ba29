use crate::{Network, Result, Wrapper, WrapperContext, WrapperError};
use async_trait::async_trait;
use infrabridge_core::payload::NetworkConfigurePayload;
use infrabridge_core::WrapperConfiguration;
use std::sync::Arc;
use tracing::info;

/// Network driver that accepts every chaining request. Setting `"fail": true`
/// in the configuration blob makes every call fail instead.
pub struct MockNetworkWrapper {
    config: WrapperConfiguration,
    fail: bool,
}

impl MockNetworkWrapper {
    pub fn new(config: WrapperConfiguration, _context: WrapperContext) -> Result<Self> {
        if config.config_str("compute_uuid").is_none() {
            return Err(WrapperError::Configuration(
                "network backends need configuration.compute_uuid".to_string(),
            ));
        }
        let fail = config
            .configuration
            .get("fail")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Self { config, fail })
    }

    pub fn construct(
        config: WrapperConfiguration,
        context: WrapperContext,
    ) -> Result<Arc<dyn Wrapper>> {
        Ok(Arc::new(Self::new(config, context)?))
    }

    fn check(&self, instance_id: &str) -> Result<()> {
        if self.fail {
            return Err(WrapperError::TerminalFailure(format!(
                "network VIM {} rejected instance {instance_id}",
                self.config.uuid
            )));
        }
        Ok(())
    }
}

impl Wrapper for MockNetworkWrapper {
    fn config(&self) -> &WrapperConfiguration {
        &self.config
    }

    fn as_network(&self) -> Option<&dyn Network> {
        Some(self)
    }
}

#[async_trait]
impl Network for MockNetworkWrapper {
    async fn configure_networking(&self, data: &NetworkConfigurePayload) -> Result<()> {
        self.check(&data.service_instance_id)?;
        info!(
            backend = %self.config.uuid,
            instance = %data.service_instance_id,
            functions = data.vnfds.len(),
            "Mock service chain configured"
        );
        Ok(())
    }

    async fn deconfigure_networking(&self, instance_id: &str) -> Result<()> {
        self.check(instance_id)?;
        info!(backend = %self.config.uuid, instance = %instance_id, "Mock service chain removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrabridge_core::WrapperCategory;

    fn config(blob: serde_json::Value) -> WrapperConfiguration {
        WrapperConfiguration::new(WrapperCategory::Network, "mock", "localhost")
            .with_configuration(blob)
    }

    #[test]
    fn test_requires_compute_attachment() {
        assert!(matches!(
            MockNetworkWrapper::new(config(serde_json::json!({})), WrapperContext::in_memory()),
            Err(WrapperError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_configure_and_deconfigure() {
        let wrapper = MockNetworkWrapper::new(
            config(serde_json::json!({"compute_uuid": "vim-1"})),
            WrapperContext::in_memory(),
        )
        .unwrap();
        let payload = NetworkConfigurePayload {
            service_instance_id: "svc".into(),
            nsd: serde_json::Value::Null,
            vnfds: vec![],
            vnfrs: vec![],
            nap: None,
        };
        assert!(wrapper.configure_networking(&payload).await.is_ok());
        assert!(wrapper.deconfigure_networking("svc").await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_flag() {
        let wrapper = MockNetworkWrapper::new(
            config(serde_json::json!({"compute_uuid": "vim-1", "fail": true})),
            WrapperContext::in_memory(),
        )
        .unwrap();
        assert!(matches!(
            wrapper.deconfigure_networking("svc").await,
            Err(WrapperError::TerminalFailure(_))
        ));
    }
}
