use super::{CallContext, CallCorrelator, FanOutTracker};
use crate::shared::error::AdaptorResult;
use crate::shared::types::CallReply;
use async_trait::async_trait;
use infrabridge_core::payload::{
    ConnectionPointRef, NetworkConfigurePayload, NetworkDeconfigurePayload, PointOwner,
    ServicePreparePayload, ServiceRemovePayload,
};
use infrabridge_core::{ApiResponse, WrapperCategory};
use infrabridge_wrappers::Wrapper;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Uploads missing images and prepares the instance on every listed VIM.
pub struct PrepareService;

#[async_trait]
impl CallCorrelator for PrepareService {
    fn call(&self) -> &'static str {
        "service.prepare"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: ServicePreparePayload = ctx.parse()?;
        let repository = &ctx.registry().context().repository;

        for vim in &payload.vim_list {
            let wrapper = ctx
                .registry()
                .lookup_category(&vim.uuid, WrapperCategory::Compute)
                .await?;
            let Some(compute) = wrapper.as_ref().and_then(|w| w.as_compute()) else {
                warn!(sid = %ctx.sid(), backend = %vim.uuid, "Error retrieving the wrapper");
                return Ok(CallReply::error("VIM not found"));
            };

            for image in &vim.images {
                if compute.is_image_stored(image).await? {
                    debug!(sid = %ctx.sid(), image = %image.id, "Image already stored in the VIM image repository");
                } else {
                    info!(sid = %ctx.sid(), image = %image.id, "Image not stored in VIM image repository");
                    compute.upload_image(image).await?;
                }
            }

            if repository
                .read_service_instance(&payload.instance_id, &vim.uuid)
                .await?
                .is_some()
            {
                debug!(sid = %ctx.sid(), backend = %vim.uuid, "Service instance already prepared");
                continue;
            }
            if !compute.prepare_service(&payload.instance_id).await? {
                return Ok(CallReply::error(format!(
                    "Unable to prepare the environment for instance: {} on Compute VIM {}",
                    payload.instance_id, vim.uuid
                )));
            }
        }

        info!(sid = %ctx.sid(), instance = %payload.instance_id, "Preparation complete");
        Ok(CallReply::completed())
    }
}

/// Removes the instance from every compute VIM hosting it.
pub struct RemoveService;

#[async_trait]
impl CallCorrelator for RemoveService {
    fn call(&self) -> &'static str {
        "service.remove"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: ServiceRemovePayload = ctx.parse()?;
        let instance_id = payload.instance_uuid;
        let backends = ctx
            .registry()
            .context()
            .repository
            .backends_for_instance(&instance_id)
            .await?;
        if backends.is_empty() {
            return Ok(CallReply::warning(
                "can't find instance UUID or associated VIMs in Infrastructure repository",
            ));
        }
        debug!(sid = %ctx.sid(), backends = ?backends, "VIMs hosting the service");

        let mut subscription = ctx.subscribe();
        let mut tracker = FanOutTracker::new(backends.iter().cloned());
        for uuid in &backends {
            let wrapper = ctx
                .registry()
                .lookup_category(uuid, WrapperCategory::Compute)
                .await?;
            let Some(compute) = wrapper.as_ref().and_then(|w| w.as_compute()) else {
                warn!(sid = %ctx.sid(), backend = %uuid, "Can't build a wrapper for VIM");
                tracker.fail_branch(uuid);
                continue;
            };
            if let Err(e) = compute.remove_service(&instance_id, ctx.sid()).await {
                warn!(sid = %ctx.sid(), backend = %uuid, error = %e, "Remove request refused");
                tracker.fail_branch(uuid);
            }
        }

        while !tracker.is_done() {
            match subscription.recv().await {
                Some(update) => tracker.observe(&update),
                None => break,
            }
        }
        Ok(ApiResponse {
            request_status: tracker.outcome(),
            message: String::new(),
            uuid: None,
        }
        .into())
    }
}

/// Distinct network backends attached to the compute VIMs hosting `instance_id`.
async fn attached_networks(
    ctx: &CallContext,
    instance_id: &str,
) -> AdaptorResult<Vec<Arc<dyn Wrapper>>> {
    let computes = ctx
        .registry()
        .context()
        .repository
        .backends_for_instance(instance_id)
        .await?;
    let mut seen = HashSet::new();
    let mut networks = Vec::new();
    for compute in computes {
        match ctx.registry().network_for_compute(&compute).await? {
            Some(network) if seen.insert(network.config().uuid.clone()) => networks.push(network),
            Some(_) => {}
            None => debug!(backend = %compute, "No networking VIM attached"),
        }
    }
    Ok(networks)
}

/// Configures the service chain. Each forwarding path is split by the network
/// VIM serving the compute VIM of every function it crosses, and each network
/// VIM receives only its own part of the graph.
pub struct ConfigureNetwork;

#[async_trait]
impl CallCorrelator for ConfigureNetwork {
    fn call(&self) -> &'static str {
        "service.chain.configure"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: NetworkConfigurePayload = ctx.parse()?;
        info!(sid = %ctx.sid(), instance = %payload.service_instance_id, "Received networking.configure call");
        let graph = payload.service_graph()?;
        let repository = &ctx.registry().context().repository;

        let mut networks: HashMap<String, Arc<dyn Wrapper>> = HashMap::new();
        for path in graph.paths() {
            let mut subgraphs: BTreeMap<String, (Vec<ConnectionPointRef>, Vec<serde_json::Value>)> =
                BTreeMap::new();

            for point in path.ordered() {
                let vnf_id = match point.owner() {
                    PointOwner::Service => continue,
                    PointOwner::Malformed => {
                        warn!(sid = %ctx.sid(), point = %point.connection_point_ref, "Unable to parse the service graph");
                        return Ok(CallReply::error(format!(
                            "Unable to parse NSD service graph. Error in the connection_point_reference fields: {}",
                            point.connection_point_ref
                        )));
                    }
                    PointOwner::Function { vnf_id, .. } => vnf_id.to_string(),
                };

                let Some(vnfd) = graph
                    .function_name(&vnf_id)
                    .and_then(|name| payload.vnfd_named(name))
                else {
                    return Ok(CallReply::error(format!(
                        "Can't find the descriptor of function {vnf_id}"
                    )));
                };
                let function_id = vnfd
                    .get("instance_uuid")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let Some(placement) = repository.read_function_instance(function_id).await? else {
                    warn!(sid = %ctx.sid(), function = %function_id, "Can't find Compute VIM UUID for function instance");
                    return Ok(CallReply::error(format!(
                        "Can't find VIM where function instance {function_id} is deployed"
                    )));
                };
                let Some(network) = ctx
                    .registry()
                    .network_for_compute(&placement.backend_uuid)
                    .await?
                else {
                    return Ok(CallReply::error(format!(
                        "No networking VIM attached to compute VIM {}",
                        placement.backend_uuid
                    )));
                };

                let network_uuid = network.config().uuid.clone();
                networks.entry(network_uuid.clone()).or_insert(network);
                let (points, vnfds) = subgraphs.entry(network_uuid).or_default();
                if !vnfds.contains(vnfd) {
                    vnfds.push(vnfd.clone());
                }
                points.push(point);
            }

            for (network_uuid, (points, vnfds)) in subgraphs {
                let Some(network) = networks.get(&network_uuid).and_then(|w| w.as_network())
                else {
                    continue;
                };
                debug!(sid = %ctx.sid(), backend = %network_uuid, functions = vnfds.len(), "Partial configuration for network VIM");
                if let Err(e) = network
                    .configure_networking(&payload.partial(points, vnfds))
                    .await
                {
                    warn!(sid = %ctx.sid(), backend = %network_uuid, error = %e, "Unable to configure networking on VIM");
                    return Ok(CallReply::error(e.to_string()));
                }
            }
        }
        Ok(CallReply::completed())
    }
}

pub struct DeconfigureNetwork;

#[async_trait]
impl CallCorrelator for DeconfigureNetwork {
    fn call(&self) -> &'static str {
        "service.chain.deconfigure"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: NetworkDeconfigurePayload = ctx.parse()?;
        info!(sid = %ctx.sid(), instance = %payload.service_instance_id, "Received networking.deconfigure call");

        for wrapper in attached_networks(ctx, &payload.service_instance_id).await? {
            let Some(network) = wrapper.as_network() else {
                continue;
            };
            network
                .deconfigure_networking(&payload.service_instance_id)
                .await?;
        }
        Ok(CallReply::completed())
    }
}
