use crate::features::backend_management::service::BackendRegistry;
use crate::features::observability::controller::ObservabilityController;
use crate::shared::error::AdaptorResult;
use crate::shared::types::CallReply;
use infrabridge_core::payload::{AddBackendPayload, AttachVimPayload, ResourceAvailabilityPayload};
use infrabridge_core::{
    ApiResponse, BackendResources, BackendSummary, RequestStatus, ResourceUtilisation,
    WrapperCategory,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Management API of the adaptor: synchronous calls answered from the registry.
pub struct BackendManagementController {
    registry: Arc<BackendRegistry>,
    metrics: Arc<ObservabilityController>,
}

fn json_reply<T: Serialize>(value: &T) -> CallReply {
    match serde_json::to_string(value) {
        Ok(body) => CallReply::new(RequestStatus::Completed, body),
        Err(_) => CallReply::error("Internal Server Error"),
    }
}

impl BackendManagementController {
    pub fn new(registry: Arc<BackendRegistry>, metrics: Arc<ObservabilityController>) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    async fn refresh_backend_gauge(&self, category: WrapperCategory) {
        if let Ok(uuids) = self.registry.list(category).await {
            self.metrics.set_registered_backends(category, uuids.len());
        }
    }

    pub async fn add_backend(
        &self,
        category: WrapperCategory,
        payload: AddBackendPayload,
    ) -> CallReply {
        let config = payload.into_configuration(category);
        match self.registry.register(config).await {
            Ok(uuid) => {
                self.refresh_backend_gauge(category).await;
                ApiResponse::completed_with_uuid(uuid).into()
            }
            Err(e) => {
                warn!(category = %category, error = %e, "Backend registration refused");
                CallReply::error(format!("Cannot Attach To Vim: {e}"))
            }
        }
    }

    pub async fn remove_backend(
        &self,
        category: WrapperCategory,
        uuid: &str,
    ) -> AdaptorResult<CallReply> {
        match self.registry.configuration(uuid).await? {
            Some(config) if config.category == category => {}
            _ => {
                return Ok(CallReply::warning(format!(
                    "No {category} VIM with uuid {uuid}"
                )))
            }
        }
        self.registry.remove(uuid).await?;
        self.refresh_backend_gauge(category).await;
        Ok(CallReply::completed())
    }

    /// One row per compute backend. Unreachable backends report `-1` resources.
    pub async fn list_compute(&self) -> AdaptorResult<CallReply> {
        let uuids = self.registry.list(WrapperCategory::Compute).await?;
        info!(count = uuids.len(), "Retrieving VIM(s) resource utilisation");

        let mut rows = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            let Some(wrapper) = self.registry.lookup(&uuid).await? else {
                return Ok(CallReply::error("VIM not found"));
            };
            let resources = match wrapper.as_compute() {
                Some(compute) => match compute.get_resource_utilisation().await {
                    Ok(resources) => resources,
                    Err(e) => {
                        warn!(backend = %uuid, error = %e, "Resource utilisation unavailable");
                        ResourceUtilisation::unavailable()
                    }
                },
                None => ResourceUtilisation::unavailable(),
            };
            rows.push(BackendResources::new(wrapper.config(), resources));
        }
        Ok(json_reply(&rows))
    }

    pub async fn list_backends(&self, category: WrapperCategory) -> AdaptorResult<CallReply> {
        let mut rows = Vec::new();
        for uuid in self.registry.list(category).await? {
            if let Some(config) = self.registry.configuration(&uuid).await? {
                let attached_to = match category {
                    WrapperCategory::Network => config.config_str("compute_uuid"),
                    _ => None,
                };
                rows.push(BackendSummary {
                    uuid: config.uuid,
                    name: config.name,
                    vendor: config.vendor,
                    endpoint: config.endpoint,
                    attached_to,
                });
            }
        }
        Ok(json_reply(&rows))
    }

    /// Checks whether a compute backend can host the requested cores and memory.
    pub async fn resource_availability(
        &self,
        payload: ResourceAvailabilityPayload,
    ) -> AdaptorResult<CallReply> {
        let wrapper = self
            .registry
            .lookup_category(&payload.vim_uuid, WrapperCategory::Compute)
            .await?;
        let Some(compute) = wrapper.as_ref().and_then(|w| w.as_compute()) else {
            return Ok(CallReply::error("VIM not found"));
        };
        let resources = compute.get_resource_utilisation().await?;
        if resources == ResourceUtilisation::unavailable() {
            return Ok(CallReply::error("Unable to retrieve resource utilisation"));
        }

        let free_cores = resources.total_cores - resources.used_cores;
        let free_memory = resources.total_memory - resources.used_memory;
        let enough = payload.cores.map_or(true, |cores| cores <= free_cores)
            && payload.memory.map_or(true, |memory| memory <= free_memory);
        let (status, message) = if enough {
            (RequestStatus::Completed, "")
        } else {
            (RequestStatus::Error, "Not enough resources")
        };
        let body = serde_json::json!({
            "request_status": status,
            "message": message,
            "core_total": resources.total_cores,
            "core_used": resources.used_cores,
            "memory_total": resources.total_memory,
            "memory_used": resources.used_memory,
        });
        Ok(CallReply::new(status, body.to_string()))
    }

    pub async fn attach_vim(&self, payload: AttachVimPayload) -> AdaptorResult<CallReply> {
        self.registry
            .attach_to_wan(&payload.wim_uuid, &payload.vim_uuid, &payload.vim_address)
            .await?;
        Ok(CallReply::completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrabridge_wrappers::{WrapperContext, WrapperFactory};
    use serde_json::json;

    fn controller() -> BackendManagementController {
        let registry = Arc::new(BackendRegistry::new(
            WrapperFactory::with_defaults(),
            WrapperContext::in_memory(),
        ));
        BackendManagementController::new(
            registry,
            Arc::new(ObservabilityController::with_registry().unwrap()),
        )
    }

    fn add_payload(vendor: &str, configuration: serde_json::Value) -> AddBackendPayload {
        serde_json::from_value(json!({
            "vim_type": vendor,
            "vim_address": "10.100.32.200",
            "username": "op",
            "pass": "secret",
            "city": "Athens",
            "country": "Greece",
            "name": "athens-1",
            "configuration": configuration
        }))
        .unwrap()
    }

    fn uuid_of(reply: &CallReply) -> String {
        let response: ApiResponse = serde_json::from_str(&reply.body).unwrap();
        response.uuid.unwrap()
    }

    #[tokio::test]
    async fn test_add_list_remove_compute() {
        let controller = controller();
        let added = controller
            .add_backend(WrapperCategory::Compute, add_payload("mock", json!({})))
            .await;
        assert_eq!(added.status, RequestStatus::Completed);
        let uuid = uuid_of(&added);

        let listed = controller.list_compute().await.unwrap();
        let rows: Vec<BackendResources> = serde_json::from_str(&listed.body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vim_uuid, uuid);
        assert_eq!(rows[0].vim_city, "Athens");
        assert!(rows[0].core_total >= 0 && rows[0].memory_total >= 0);

        let removed = controller
            .remove_backend(WrapperCategory::Compute, &uuid)
            .await
            .unwrap();
        assert_eq!(removed.status, RequestStatus::Completed);
        let listed = controller.list_compute().await.unwrap();
        assert_eq!(listed.body, "[]");
    }

    #[tokio::test]
    async fn test_add_unknown_vendor_is_error() {
        let controller = controller();
        let reply = controller
            .add_backend(WrapperCategory::Compute, add_payload("vmware", json!({})))
            .await;
        assert_eq!(reply.status, RequestStatus::Error);
        assert!(reply.body.contains("Cannot Attach To Vim"));
    }

    #[tokio::test]
    async fn test_remove_with_wrong_category_warns() {
        let controller = controller();
        let uuid = uuid_of(
            &controller
                .add_backend(WrapperCategory::Compute, add_payload("mock", json!({})))
                .await,
        );
        let reply = controller
            .remove_backend(WrapperCategory::Network, &uuid)
            .await
            .unwrap();
        assert_eq!(reply.status, RequestStatus::Warning);
    }

    #[tokio::test]
    async fn test_network_list_reports_attachment() {
        let controller = controller();
        let compute = uuid_of(
            &controller
                .add_backend(WrapperCategory::Compute, add_payload("mock", json!({})))
                .await,
        );
        let network = controller
            .add_backend(
                WrapperCategory::Network,
                add_payload("mock", json!({ "compute_uuid": compute })),
            )
            .await;
        assert_eq!(network.status, RequestStatus::Completed);

        let listed = controller
            .list_backends(WrapperCategory::Network)
            .await
            .unwrap();
        let rows: Vec<BackendSummary> = serde_json::from_str(&listed.body).unwrap();
        assert_eq!(rows[0].attached_to.as_deref(), Some(compute.as_str()));
    }

    #[tokio::test]
    async fn test_resource_availability() {
        let controller = controller();
        let uuid = uuid_of(
            &controller
                .add_backend(
                    WrapperCategory::Compute,
                    add_payload("mock", json!({ "cores": 8, "memory": 4096 })),
                )
                .await,
        );

        let fits = controller
            .resource_availability(ResourceAvailabilityPayload {
                vim_uuid: uuid.clone(),
                cores: Some(4),
                memory: Some(2048),
            })
            .await
            .unwrap();
        assert_eq!(fits.status, RequestStatus::Completed);

        let too_big = controller
            .resource_availability(ResourceAvailabilityPayload {
                vim_uuid: uuid,
                cores: Some(16),
                memory: None,
            })
            .await
            .unwrap();
        assert_eq!(too_big.status, RequestStatus::Error);
        assert!(too_big.body.contains("Not enough resources"));
    }

    #[tokio::test]
    async fn test_resource_availability_unknown_vim() {
        let reply = controller()
            .resource_availability(ResourceAvailabilityPayload {
                vim_uuid: "missing".into(),
                cores: None,
                memory: None,
            })
            .await
            .unwrap();
        assert!(reply.body.contains("VIM not found"));
    }
}
