use crate::features::heat_compute::repo::{StackClient, StackResource};
use crate::features::heat_compute::template;
use crate::monitor::{BackoffPolicy, DeploymentMonitor, StackAction};
use crate::repository::{InstancePlacement, StackRecord};
use crate::{Result, WrapperContext, WrapperError};
use infrabridge_core::payload::{DeployResponse, FunctionDeployPayload, FunctionScalePayload};
use infrabridge_core::{RequestStatus, WrapperConfiguration};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SERVICE_SUBNETS: usize = 5;
const DEFAULT_FLAVOR: &str = "m1.small";

/// Stack lifecycle of service and function instances on one Heat VIM.
#[derive(Clone)]
pub struct HeatComputeService {
    config: WrapperConfiguration,
    context: WrapperContext,
    client: Arc<dyn StackClient>,
    policy: BackoffPolicy,
}

impl HeatComputeService {
    pub fn new(
        config: WrapperConfiguration,
        context: WrapperContext,
        client: Arc<dyn StackClient>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            config,
            context,
            client,
            policy,
        }
    }

    pub fn context(&self) -> &WrapperContext {
        &self.context
    }

    pub fn client(&self) -> &dyn StackClient {
        self.client.as_ref()
    }

    fn uuid(&self) -> &str {
        &self.config.uuid
    }

    async fn status_of(&self, name: &str, id: &str) -> Option<String> {
        match self.client.stack_status(name, id).await {
            Ok(status) => status,
            Err(e) => {
                debug!(stack = %name, error = %e, "Stack status unavailable");
                None
            }
        }
    }

    async fn resources_of(&self, name: &str, id: &str, prefix: &str) -> Option<Vec<StackResource>> {
        let resources: Vec<_> = self
            .client
            .stack_resources(name, id)
            .await
            .ok()?
            .into_iter()
            .filter(|r| r.resource_name.starts_with(prefix))
            .collect();
        (!resources.is_empty()).then_some(resources)
    }

    /// Reserves the service networks and creates the service stack.
    pub async fn prepare_service(&self, instance_id: &str) -> Result<bool> {
        let cidr = self.config.tenant_cidr();
        let subnets = self
            .context
            .subnets
            .reserve(self.uuid(), cidr.as_deref(), instance_id, SERVICE_SUBNETS)?
            .ok_or_else(|| {
                WrapperError::ResourceExhausted(
                    "Unable to allocate internal addresses. Too many service instances"
                        .to_string(),
                )
            })?;

        let recorded = match self.create_service_stack(instance_id, &subnets).await {
            Ok(record) => self.context.repository.write_service_instance(record).await,
            Err(e) => Err(e),
        };
        match recorded {
            Ok(()) => {
                info!(backend = %self.uuid(), instance = %instance_id, "Service stack created");
                Ok(true)
            }
            Err(e) => {
                if let Err(free_err) = self.context.subnets.free(self.uuid(), instance_id) {
                    warn!(instance = %instance_id, error = %free_err, "Unable to release subnets");
                }
                Err(e)
            }
        }
    }

    async fn create_service_stack(
        &self,
        instance_id: &str,
        subnets: &[String],
    ) -> Result<StackRecord> {
        let ext_router = self.config.config_str("tenant_ext_router");
        let template = template::service_template(instance_id, subnets, ext_router.as_deref())?;
        let stack_name = format!("SonataService-{instance_id}");

        let mut monitor = DeploymentMonitor::new(self.policy);
        let handle = self.client.create_stack(&stack_name, template).await?;
        let stack_id = monitor.submitted(handle)?;
        let id = stack_id.as_str();
        let name = stack_name.as_str();
        monitor
            .poll_until_terminal(StackAction::Create, || self.status_of(name, id))
            .await?;

        Ok(StackRecord {
            instance_id: instance_id.to_string(),
            backend_uuid: self.uuid().to_string(),
            stack_id,
            stack_name,
        })
    }

    async fn service_stack(&self, service_instance_id: &str) -> Result<StackRecord> {
        self.context
            .repository
            .read_service_instance(service_instance_id, self.uuid())
            .await?
            .ok_or_else(|| {
                WrapperError::TerminalFailure(format!(
                    "service instance {service_instance_id} is not prepared on VIM {}",
                    self.uuid()
                ))
            })
    }

    /// Pushes an edited template and waits for the update to settle, then
    /// harvests the resources whose name starts with `prefix`.
    async fn update_and_harvest(
        &self,
        stack: &StackRecord,
        template: Value,
        prefix: &str,
    ) -> Result<Vec<StackResource>> {
        let name = stack.stack_name.as_str();
        let id = stack.stack_id.as_str();
        self.client.update_stack(name, id, template).await?;

        let mut monitor = DeploymentMonitor::new(self.policy);
        monitor
            .poll_until_terminal(StackAction::Update, || self.status_of(name, id))
            .await?;
        let resources = monitor
            .harvest(|| self.resources_of(name, id, prefix))
            .await?;
        Ok(resources)
    }

    fn response(&self, stack: &StackRecord, record: Value) -> DeployResponse {
        DeployResponse {
            request_status: RequestStatus::Completed,
            instance_vim_uuid: stack.stack_id.clone(),
            instance_name: stack.stack_name.clone(),
            vim_uuid: self.uuid().to_string(),
            record,
            message: String::new(),
        }
    }

    pub async fn deploy_function(&self, data: FunctionDeployPayload) -> Result<DeployResponse> {
        let stack = self.service_stack(&data.service_instance_id).await?;
        let function_id = data
            .function_instance_id()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let flavor = self
            .config
            .config_str("default_flavor")
            .unwrap_or_else(|| DEFAULT_FLAVOR.to_string());

        let mut template = self
            .client
            .stack_template(&stack.stack_name, &stack.stack_id)
            .await?;
        template::add_function(
            &mut template,
            &data.service_instance_id,
            &function_id,
            &data.vnfd,
            &flavor,
        )?;

        let resources = self
            .update_and_harvest(&stack, template, &format!("{function_id}."))
            .await?;
        self.context
            .repository
            .write_function_instance(
                &function_id,
                InstancePlacement {
                    service_instance_id: data.service_instance_id.clone(),
                    backend_uuid: self.uuid().to_string(),
                },
            )
            .await?;

        info!(backend = %self.uuid(), function = %function_id, resources = resources.len(), "Function deployed");
        Ok(self.response(
            &stack,
            json!({
                "id": function_id,
                "descriptor_reference": data.vnfd.get("uuid").cloned().unwrap_or_default(),
                "status": "normal operation",
                "resources": resources
            }),
        ))
    }

    pub async fn scale_function(&self, data: FunctionScalePayload) -> Result<DeployResponse> {
        let placement = self
            .context
            .repository
            .read_function_instance(&data.function_instance_id)
            .await?
            .filter(|p| p.backend_uuid == self.config.uuid)
            .ok_or_else(|| {
                WrapperError::TerminalFailure(format!(
                    "function instance {} not found on VIM {}",
                    data.function_instance_id,
                    self.uuid()
                ))
            })?;
        let stack = self.service_stack(&placement.service_instance_id).await?;

        let mut template = self
            .client
            .stack_template(&stack.stack_name, &stack.stack_id)
            .await?;
        template::scale_function(
            &mut template,
            &data.function_instance_id,
            data.number_of_instances,
        )?;

        let resources = self
            .update_and_harvest(&stack, template, &format!("{}.", data.function_instance_id))
            .await?;
        Ok(self.response(
            &stack,
            json!({
                "id": data.function_instance_id,
                "number_of_instances": data.number_of_instances,
                "status": "normal operation",
                "resources": resources
            }),
        ))
    }

    /// Deletes the service stack and releases its networks.
    pub async fn remove_service(&self, instance_id: &str) -> Result<()> {
        let stack = self.service_stack(instance_id).await?;
        let outcome = self
            .client
            .delete_stack(&stack.stack_name, &stack.stack_id)
            .await?;
        if outcome != "DELETED" {
            return Err(WrapperError::TerminalFailure(format!(
                "stack {} deletion returned {outcome}",
                stack.stack_name
            )));
        }

        self.context
            .repository
            .remove_service_instance(instance_id, self.uuid())
            .await?;
        if let Err(e) = self.context.subnets.free(self.uuid(), instance_id) {
            warn!(backend = %self.uuid(), instance = %instance_id, error = %e, "Unable to release subnets");
        }
        info!(backend = %self.uuid(), instance = %instance_id, "Service stack deleted");
        Ok(())
    }
}
