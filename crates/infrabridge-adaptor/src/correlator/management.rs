use super::{CallContext, CallCorrelator};
use crate::shared::error::AdaptorResult;
use crate::shared::types::CallReply;
use async_trait::async_trait;
use infrabridge_core::payload::{
    AddBackendPayload, AttachVimPayload, RemoveBackendPayload, ResourceAvailabilityPayload,
};
use infrabridge_core::WrapperCategory;

pub struct AddBackend(pub WrapperCategory);

#[async_trait]
impl CallCorrelator for AddBackend {
    fn call(&self) -> &'static str {
        "management.add"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: AddBackendPayload = ctx.parse()?;
        Ok(ctx.management.add_backend(self.0, payload).await)
    }
}

pub struct RemoveBackend(pub WrapperCategory);

#[async_trait]
impl CallCorrelator for RemoveBackend {
    fn call(&self) -> &'static str {
        "management.remove"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: RemoveBackendPayload = ctx.parse()?;
        ctx.management.remove_backend(self.0, &payload.uuid).await
    }
}

pub struct ListCompute;

#[async_trait]
impl CallCorrelator for ListCompute {
    fn call(&self) -> &'static str {
        "compute.list"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        ctx.management.list_compute().await
    }
}

pub struct ListBackends(pub WrapperCategory);

#[async_trait]
impl CallCorrelator for ListBackends {
    fn call(&self) -> &'static str {
        "management.list"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        ctx.management.list_backends(self.0).await
    }
}

pub struct ResourceAvailability;

#[async_trait]
impl CallCorrelator for ResourceAvailability {
    fn call(&self) -> &'static str {
        "compute.resourceAvailability"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: ResourceAvailabilityPayload = ctx.parse()?;
        ctx.management.resource_availability(payload).await
    }
}

pub struct AttachVim;

#[async_trait]
impl CallCorrelator for AttachVim {
    fn call(&self) -> &'static str {
        "wan.attach"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: AttachVimPayload = ctx.parse()?;
        ctx.management.attach_vim(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::tests::{context_for, with_message};
    use infrabridge_core::{ApiResponse, RequestStatus};
    use serde_json::json;

    const ADD: &str = "infrastructure.management.compute.add";

    fn add_body(vendor: &str) -> String {
        json!({
            "vim_type": vendor,
            "vim_address": "10.0.0.1",
            "pass": "x",
            "city": "Paderborn",
            "country": "Germany",
            "name": "upb",
            "configuration": {}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let ctx = context_for(ADD, &add_body("mock"));
        let added = AddBackend(WrapperCategory::Compute)
            .correlate(&ctx)
            .await
            .unwrap();
        let response: ApiResponse = serde_json::from_str(&added.body).unwrap();
        let uuid = response.uuid.unwrap();

        let remove = with_message(
            &ctx,
            "infrastructure.management.compute.remove",
            &json!({ "uuid": uuid }).to_string(),
        );
        let removed = RemoveBackend(WrapperCategory::Compute)
            .correlate(&remove)
            .await
            .unwrap();
        assert_eq!(removed.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_add_rejects_malformed_payload() {
        let ctx = context_for(ADD, r#"{"vim_type":"mock"}"#);
        assert!(AddBackend(WrapperCategory::Compute)
            .correlate(&ctx)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_wan_attach_unknown_wim() {
        let ctx = context_for(
            "infrastructure.management.wan.attach",
            r#"{"wim_uuid":"w","vim_uuid":"v","vim_address":"10.0.0.0/16"}"#,
        );
        assert!(AttachVim.correlate(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_list_wan_is_empty_array() {
        let ctx = context_for("infrastructure.management.wan.list", "");
        let reply = ListBackends(WrapperCategory::Wan)
            .correlate(&ctx)
            .await
            .unwrap();
        assert_eq!(reply.body, "[]");
    }
}
