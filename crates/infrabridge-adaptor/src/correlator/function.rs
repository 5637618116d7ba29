use super::{await_single, CallContext, CallCorrelator};
use crate::shared::error::AdaptorResult;
use crate::shared::types::CallReply;
use async_trait::async_trait;
use infrabridge_core::payload::{
    CloudServiceDeployPayload, FunctionDeployPayload, FunctionScalePayload,
};
use infrabridge_core::WrapperCategory;
use infrabridge_wrappers::Wrapper;
use std::sync::Arc;
use tracing::{info, warn};

async fn compute_backend(
    ctx: &CallContext,
    vim_uuid: &str,
) -> AdaptorResult<Option<Arc<dyn Wrapper>>> {
    let wrapper = ctx
        .registry()
        .lookup_category(vim_uuid, WrapperCategory::Compute)
        .await?;
    if wrapper.is_none() {
        warn!(sid = %ctx.sid(), backend = %vim_uuid, "Error retrieving the wrapper");
    }
    Ok(wrapper)
}

pub struct DeployFunction;

#[async_trait]
impl CallCorrelator for DeployFunction {
    fn call(&self) -> &'static str {
        "function.deploy"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: FunctionDeployPayload = ctx.parse()?;
        let wrapper = compute_backend(ctx, &payload.vim_uuid).await?;
        let Some(compute) = wrapper.as_ref().and_then(|w| w.as_compute()) else {
            return Ok(CallReply::error("VIM not found"));
        };

        info!(sid = %ctx.sid(), backend = %payload.vim_uuid, function = %payload.function_name(), "Calling wrapper");
        let mut subscription = ctx.subscribe();
        compute.deploy_function(payload, ctx.sid()).await?;
        await_single(&mut subscription).await
    }
}

pub struct ScaleFunction;

#[async_trait]
impl CallCorrelator for ScaleFunction {
    fn call(&self) -> &'static str {
        "function.scale"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: FunctionScalePayload = ctx.parse()?;
        let wrapper = compute_backend(ctx, &payload.vim_uuid).await?;
        let Some(compute) = wrapper.as_ref().and_then(|w| w.as_compute()) else {
            return Ok(CallReply::error("VIM not found"));
        };

        let mut subscription = ctx.subscribe();
        compute.scale_function(payload, ctx.sid()).await?;
        await_single(&mut subscription).await
    }
}

pub struct DeployCloudService;

#[async_trait]
impl CallCorrelator for DeployCloudService {
    fn call(&self) -> &'static str {
        "cloud_service.deploy"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: CloudServiceDeployPayload = ctx.parse()?;
        let wrapper = compute_backend(ctx, &payload.vim_uuid).await?;
        let Some(compute) = wrapper.as_ref().and_then(|w| w.as_compute()) else {
            return Ok(CallReply::error("VIM not found"));
        };

        let mut subscription = ctx.subscribe();
        compute.deploy_cloud_service(payload, ctx.sid()).await?;
        await_single(&mut subscription).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::tests::{context_for, with_message};
    use infrabridge_core::payload::DeployResponse;
    use infrabridge_core::{ApiResponse, RequestStatus, WrapperConfiguration};
    use serde_json::json;

    async fn prepared_vim(ctx: &CallContext, instance: &str) -> String {
        let vim = ctx
            .registry()
            .register(WrapperConfiguration::new(
                WrapperCategory::Compute,
                "mock",
                "10.0.0.1",
            ))
            .await
            .unwrap();
        let wrapper = ctx.registry().lookup(&vim).await.unwrap().unwrap();
        wrapper
            .as_compute()
            .unwrap()
            .prepare_service(instance)
            .await
            .unwrap();
        vim
    }

    fn vnfd(instance: &str) -> serde_json::Value {
        json!({
            "name": "firewall",
            "instance_uuid": instance,
            "virtual_deployment_units": [{"id": "vdu01", "vm_image": "ubuntu"}]
        })
    }

    #[tokio::test]
    async fn test_deploy_then_scale() {
        let ctx = context_for("infrastructure.function.deploy", "{}");
        let vim = prepared_vim(&ctx, "svc").await;

        let deploy = with_message(
            &ctx,
            "infrastructure.function.deploy",
            &json!({
                "vim_uuid": vim,
                "service_instance_id": "svc",
                "vnfd": vnfd("fn-1")
            })
            .to_string(),
        );
        let reply = DeployFunction.correlate(&deploy).await.unwrap();
        assert_eq!(reply.status, RequestStatus::Completed);
        let response: DeployResponse = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(response.vim_uuid, vim);
        assert_eq!(response.instance_name, "Stack-fn-1");

        let scale = with_message(
            &ctx,
            "infrastructure.function.scale",
            &json!({
                "vim_uuid": vim,
                "service_instance_id": "svc",
                "function_instance_id": "fn-1",
                "number_of_instances": 3
            })
            .to_string(),
        );
        let scaled = ScaleFunction.correlate(&scale).await.unwrap();
        assert_eq!(scaled.status, RequestStatus::Completed);
        assert!(scaled.body.contains("\"number_of_instances\":3"));
    }

    #[tokio::test]
    async fn test_scale_unknown_function_is_error_reply() {
        let ctx = context_for("infrastructure.function.scale", "{}");
        let vim = prepared_vim(&ctx, "svc").await;
        let scale = with_message(
            &ctx,
            "infrastructure.function.scale",
            &json!({
                "vim_uuid": vim,
                "service_instance_id": "svc",
                "function_instance_id": "nope"
            })
            .to_string(),
        );
        let reply = ScaleFunction.correlate(&scale).await.unwrap();
        let response: ApiResponse = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(response.request_status, RequestStatus::Error);
        assert!(response.message.contains("nope"));
    }

    #[tokio::test]
    async fn test_deploy_on_unknown_vim() {
        let ctx = context_for(
            "infrastructure.function.deploy",
            &json!({
                "vim_uuid": "missing",
                "service_instance_id": "svc",
                "vnfd": vnfd("fn-1")
            })
            .to_string(),
        );
        let reply = DeployFunction.correlate(&ctx).await.unwrap();
        assert_eq!(reply.status, RequestStatus::Error);
        assert!(reply.body.contains("VIM not found"));
    }

    #[tokio::test]
    async fn test_cloud_service_deploy() {
        let ctx = context_for("infrastructure.cloud_service.deploy", "{}");
        let vim = prepared_vim(&ctx, "svc").await;
        let deploy = with_message(
            &ctx,
            "infrastructure.cloud_service.deploy",
            &json!({
                "vim_uuid": vim,
                "service_instance_id": "svc",
                "csd": {"name": "db", "instance_uuid": "cs-1"}
            })
            .to_string(),
        );
        let reply = DeployCloudService.correlate(&deploy).await.unwrap();
        assert_eq!(reply.status, RequestStatus::Completed);
        let placement = ctx
            .registry()
            .context()
            .repository
            .read_cloud_service_instance("cs-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(placement.backend_uuid, vim);
    }
}
