//! Compute driver that simulates a VIM without contacting one.
//!
//! Recognised configuration keys: `delay_ms` (base latency of every call,
//! jittered by up to half of it), `cores`, `memory`, `images` (ids reported as
//! stored) and `tenant_private_net_id` / `tenant_private_net_length`.

use crate::features::{deploy_update, removal_update};
use crate::repository::{InstancePlacement, StackRecord};
use crate::{Compute, Result, Wrapper, WrapperContext, WrapperError};
use async_trait::async_trait;
use infrabridge_core::payload::{
    CloudServiceDeployPayload, DeployResponse, FunctionDeployPayload, FunctionScalePayload,
    ImageRef,
};
use infrabridge_core::{RequestStatus, ResourceUtilisation, StatusUpdate, WrapperConfiguration};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SERVICE_SUBNETS: usize = 5;

#[derive(Clone)]
pub struct MockComputeWrapper {
    config: WrapperConfiguration,
    context: WrapperContext,
    delay: Duration,
}

impl MockComputeWrapper {
    pub fn new(config: WrapperConfiguration, context: WrapperContext) -> Result<Self> {
        let delay = match config.configuration.get("delay_ms") {
            None => Duration::ZERO,
            Some(_) => Duration::from_millis(config.config_u64("delay_ms").ok_or_else(|| {
                WrapperError::Configuration("delay_ms must be a non-negative integer".to_string())
            })?),
        };
        Ok(Self {
            config,
            context,
            delay,
        })
    }

    pub fn construct(
        config: WrapperConfiguration,
        context: WrapperContext,
    ) -> Result<Arc<dyn Wrapper>> {
        Ok(Arc::new(Self::new(config, context)?))
    }

    async fn simulate_delay(&self) {
        if self.delay.is_zero() {
            return;
        }
        let base = self.delay.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        tokio::time::sleep(Duration::from_millis(base + jitter)).await;
    }

    fn uuid(&self) -> &str {
        &self.config.uuid
    }

    fn publish(&self, update: StatusUpdate) {
        self.context.status.publish(update);
    }

    fn response(&self, instance: &str, record: serde_json::Value) -> DeployResponse {
        DeployResponse {
            request_status: RequestStatus::Completed,
            instance_vim_uuid: format!("Stack-{instance}"),
            instance_name: format!("Stack-{instance}"),
            vim_uuid: self.uuid().to_string(),
            record,
            message: String::new(),
        }
    }

    async fn finish_function_deploy(&self, data: FunctionDeployPayload, sid: String) {
        self.simulate_delay().await;
        let function_id = data
            .function_instance_id()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let units: Vec<serde_json::Value> = data
            .vnfd
            .get("virtual_deployment_units")
            .and_then(|v| v.as_array())
            .map(|units| {
                units
                    .iter()
                    .map(|unit| {
                        serde_json::json!({
                            "id": unit.get("id").cloned().unwrap_or_default(),
                            "number_of_instances": 1,
                            "vdu_reference": format!(
                                "{}:{}",
                                data.function_name(),
                                unit.get("id").and_then(|v| v.as_str()).unwrap_or_default()
                            ),
                            "vm_image": unit.get("vm_image").cloned().unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let record = serde_json::json!({
            "id": function_id,
            "descriptor_reference": data.vnfd.get("uuid").cloned().unwrap_or_default(),
            "status": "normal operation",
            "virtual_deployment_units": units,
        });

        let placement = InstancePlacement {
            service_instance_id: data.service_instance_id.clone(),
            backend_uuid: self.uuid().to_string(),
        };
        if let Err(e) = self
            .context
            .repository
            .write_function_instance(&function_id, placement)
            .await
        {
            self.publish(StatusUpdate::error(&sid, e.to_string()));
            return;
        }

        info!(sid = %sid, backend = %self.uuid(), function = %function_id, "Mock function deployed");
        self.publish(deploy_update(&sid, &self.response(&function_id, record)));
    }

    async fn finish_cloud_service_deploy(&self, data: CloudServiceDeployPayload, sid: String) {
        self.simulate_delay().await;
        let cloud_service_id = data
            .cloud_service_instance_id()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let placement = InstancePlacement {
            service_instance_id: data.service_instance_id.clone(),
            backend_uuid: self.uuid().to_string(),
        };
        if let Err(e) = self
            .context
            .repository
            .write_cloud_service_instance(&cloud_service_id, placement)
            .await
        {
            self.publish(StatusUpdate::error(&sid, e.to_string()));
            return;
        }

        let record = serde_json::json!({
            "id": cloud_service_id,
            "descriptor_reference": data.csd.get("uuid").cloned().unwrap_or_default(),
            "status": "normal operation",
        });
        self.publish(deploy_update(&sid, &self.response(&cloud_service_id, record)));
    }

    async fn finish_scale(&self, data: FunctionScalePayload, sid: String) {
        self.simulate_delay().await;
        let placement = match self
            .context
            .repository
            .read_function_instance(&data.function_instance_id)
            .await
        {
            Ok(Some(placement)) if placement.backend_uuid == self.config.uuid => placement,
            Ok(_) => {
                self.publish(StatusUpdate::error(
                    &sid,
                    format!(
                        "function instance {} not found on VIM {}",
                        data.function_instance_id,
                        self.uuid()
                    ),
                ));
                return;
            }
            Err(e) => {
                self.publish(StatusUpdate::error(&sid, e.to_string()));
                return;
            }
        };

        let record = serde_json::json!({
            "id": data.function_instance_id,
            "service_instance_id": placement.service_instance_id,
            "number_of_instances": data.number_of_instances,
            "status": "normal operation",
        });
        self.publish(deploy_update(
            &sid,
            &self.response(&data.function_instance_id, record),
        ));
    }

    async fn finish_remove(&self, instance_id: String, sid: String) {
        self.simulate_delay().await;
        let repository = &self.context.repository;
        match repository
            .remove_service_instance(&instance_id, self.uuid())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.publish(StatusUpdate::error(
                    &sid,
                    format!("service instance {instance_id} not found on VIM {}", self.uuid()),
                ));
                return;
            }
            Err(e) => {
                self.publish(StatusUpdate::error(&sid, e.to_string()));
                return;
            }
        }

        if let Ok(Some(_)) = self.context.subnets.reservation(self.uuid(), &instance_id) {
            if let Err(e) = self.context.subnets.free(self.uuid(), &instance_id) {
                warn!(backend = %self.uuid(), instance = %instance_id, error = %e, "Unable to release subnets");
            }
        }

        info!(sid = %sid, backend = %self.uuid(), instance = %instance_id, "Mock service removed");
        self.publish(removal_update(&sid, self.uuid()));
    }
}

impl Wrapper for MockComputeWrapper {
    fn config(&self) -> &WrapperConfiguration {
        &self.config
    }

    fn as_compute(&self) -> Option<&dyn Compute> {
        Some(self)
    }
}

#[async_trait]
impl Compute for MockComputeWrapper {
    async fn deploy_function(&self, data: FunctionDeployPayload, sid: &str) -> Result<()> {
        let this = self.clone();
        let sid = sid.to_string();
        tokio::spawn(async move { this.finish_function_deploy(data, sid).await });
        Ok(())
    }

    async fn deploy_cloud_service(
        &self,
        data: CloudServiceDeployPayload,
        sid: &str,
    ) -> Result<()> {
        let this = self.clone();
        let sid = sid.to_string();
        tokio::spawn(async move { this.finish_cloud_service_deploy(data, sid).await });
        Ok(())
    }

    async fn prepare_service(&self, instance_id: &str) -> Result<bool> {
        self.simulate_delay().await;

        let cidr = self.config.tenant_cidr();
        let subnets = self
            .context
            .subnets
            .reserve(self.uuid(), cidr.as_deref(), instance_id, SERVICE_SUBNETS)?;
        if subnets.is_none() {
            return Err(WrapperError::ResourceExhausted(
                "Unable to allocate internal addresses. Too many service instances".to_string(),
            ));
        }

        let record = StackRecord {
            instance_id: instance_id.to_string(),
            backend_uuid: self.uuid().to_string(),
            stack_id: instance_id.to_string(),
            stack_name: format!("SonataService-{instance_id}"),
        };
        if let Err(e) = self.context.repository.write_service_instance(record).await {
            if let Err(free_err) = self.context.subnets.free(self.uuid(), instance_id) {
                warn!(instance = %instance_id, error = %free_err, "Unable to release subnets");
            }
            return Err(e);
        }
        info!(backend = %self.uuid(), instance = %instance_id, "Mock service prepared");
        Ok(true)
    }

    async fn remove_service(&self, instance_id: &str, sid: &str) -> Result<()> {
        let this = self.clone();
        let instance_id = instance_id.to_string();
        let sid = sid.to_string();
        tokio::spawn(async move { this.finish_remove(instance_id, sid).await });
        Ok(())
    }

    async fn scale_function(&self, data: FunctionScalePayload, sid: &str) -> Result<()> {
        let this = self.clone();
        let sid = sid.to_string();
        tokio::spawn(async move { this.finish_scale(data, sid).await });
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        Ok(self
            .config
            .configuration
            .get("images")
            .and_then(|v| v.as_array())
            .map(|images| {
                images
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_image_stored(&self, image: &ImageRef) -> Result<bool> {
        self.simulate_delay().await;
        Ok(self.list_images().await?.contains(&image.id))
    }

    async fn upload_image(&self, image: &ImageRef) -> Result<()> {
        self.simulate_delay().await;
        info!(backend = %self.uuid(), image = %image.id, "Mock image upload");
        Ok(())
    }

    async fn get_resource_utilisation(&self) -> Result<ResourceUtilisation> {
        self.simulate_delay().await;
        Ok(ResourceUtilisation {
            total_cores: saturating_i64(self.config.config_u64("cores").unwrap_or(10)),
            used_cores: 0,
            total_memory: saturating_i64(self.config.config_u64("memory").unwrap_or(10000)),
            used_memory: 0,
        })
    }
}

/// Clamps configured totals to `i64::MAX`.
fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
