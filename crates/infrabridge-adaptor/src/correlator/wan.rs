use super::{CallContext, CallCorrelator};
use crate::shared::error::AdaptorResult;
use crate::shared::types::CallReply;
use async_trait::async_trait;
use infrabridge_core::payload::{WanConfigurePayload, WanDeconfigurePayload};
use infrabridge_core::WrapperCategory;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Installs the WAN flows joining the VIMs of one service instance.
///
/// VIMs are grouped by the WIM they are attached to. Each WIM receives the
/// sorted addresses of its VIMs, once per ingress/egress NAP pair when the
/// request names them.
pub struct ConfigureWan;

#[async_trait]
impl CallCorrelator for ConfigureWan {
    fn call(&self) -> &'static str {
        "wan.configure"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: WanConfigurePayload = ctx.parse()?;
        let vims: BTreeSet<&str> = payload.vim_list.iter().map(|v| v.uuid.as_str()).collect();
        if vims.len() < payload.vim_list.len() {
            warn!(sid = %ctx.sid(), "Duplicate VIMs in the wan configure payload");
            return Ok(CallReply::error("Duplicate VIMs in vim_list"));
        }

        let mut addresses_by_wim: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for vim in vims {
            let Some(link) = ctx.registry().wan_link(vim).await? else {
                warn!(sid = %ctx.sid(), backend = %vim, "VIM not attached to any WIM");
                return Ok(CallReply::error(format!(
                    "Can't find the WIM to wich VIM {vim} is attached"
                )));
            };
            addresses_by_wim
                .entry(link.wan_uuid)
                .or_default()
                .push(link.compute_address);
        }

        let pairs: Vec<(Option<&str>, Option<&str>)> = match &payload.nap {
            None => vec![(None, None)],
            Some(nap) => nap
                .ingresses
                .iter()
                .flat_map(|ingress| {
                    nap.egresses
                        .iter()
                        .map(move |egress| (Some(ingress.nap.as_str()), Some(egress.nap.as_str())))
                })
                .collect(),
        };

        for (wim, addresses) in &addresses_by_wim {
            let wrapper = ctx
                .registry()
                .lookup_category(wim, WrapperCategory::Wan)
                .await?;
            let Some(wan) = wrapper.as_ref().and_then(|w| w.as_wan()) else {
                return Ok(CallReply::error(format!("WIM {wim} not found")));
            };
            for (ingress, egress) in &pairs {
                debug!(sid = %ctx.sid(), wim = %wim, ingress = ?ingress, egress = ?egress, "Configuring WAN");
                if !wan
                    .configure_network(&payload.instance_id, *ingress, *egress, addresses)
                    .await?
                {
                    return Ok(CallReply::error(format!(
                        "WIM {wim} refused the configuration of instance {}",
                        payload.instance_id
                    )));
                }
            }
        }

        info!(sid = %ctx.sid(), instance = %payload.instance_id, wims = addresses_by_wim.len(), "WAN configured");
        Ok(CallReply::completed())
    }
}

/// Removes the instance's flows from every registered WIM.
pub struct DeconfigureWan;

#[async_trait]
impl CallCorrelator for DeconfigureWan {
    fn call(&self) -> &'static str {
        "wan.deconfigure"
    }

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply> {
        let payload: WanDeconfigurePayload = ctx.parse()?;
        let mut refused = Vec::new();
        for wim in ctx.registry().list(WrapperCategory::Wan).await? {
            let wrapper = ctx.registry().lookup(&wim).await?;
            let Some(wan) = wrapper.as_ref().and_then(|w| w.as_wan()) else {
                continue;
            };
            if !wan.remove_net_configuration(&payload.instance_id).await? {
                refused.push(wim);
            }
        }

        if refused.is_empty() {
            Ok(CallReply::completed())
        } else {
            Ok(CallReply::error(format!(
                "Unable to remove the WAN configuration of instance {} from WIM(s) {}",
                payload.instance_id,
                refused.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::tests::{context_for, with_message};
    use infrabridge_core::{RequestStatus, WrapperConfiguration};
    use serde_json::json;

    async fn attached_vims(ctx: &CallContext) -> (String, String) {
        let registry = ctx.registry();
        let wim = registry
            .register(WrapperConfiguration::new(
                WrapperCategory::Wan,
                "mock",
                "10.0.0.9",
            ))
            .await
            .unwrap();
        let mut vims = Vec::new();
        for address in ["10.1.0.0/16", "10.2.0.0/16"] {
            let vim = registry
                .register(WrapperConfiguration::new(
                    WrapperCategory::Compute,
                    "mock",
                    "10.0.0.1",
                ))
                .await
                .unwrap();
            registry.attach_to_wan(&wim, &vim, address).await.unwrap();
            vims.push(vim);
        }
        (vims[0].clone(), vims[1].clone())
    }

    #[tokio::test]
    async fn test_configure_with_nap() {
        let ctx = context_for("infrastructure.wan.configure", "{}");
        let (a, b) = attached_vims(&ctx).await;
        let configure = with_message(
            &ctx,
            "infrastructure.wan.configure",
            &json!({
                "instance_id": "svc",
                "vim_list": [{"uuid": b}, {"uuid": a}],
                "nap": {
                    "ingresses": [{"location": "paderborn", "nap": "10.100.0.0/24"}],
                    "egresses": [{"location": "athens", "nap": "10.200.0.0/24"}]
                }
            })
            .to_string(),
        );
        let reply = ConfigureWan.correlate(&configure).await.unwrap();
        assert_eq!(reply.status, RequestStatus::Completed);

        let deconfigure = with_message(
            &ctx,
            "infrastructure.wan.deconfigure",
            r#"{"instance_id":"svc"}"#,
        );
        let removed = DeconfigureWan.correlate(&deconfigure).await.unwrap();
        assert_eq!(removed.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_vims_rejected() {
        let ctx = context_for(
            "infrastructure.wan.configure",
            r#"{"instance_id":"svc","vim_list":[{"uuid":"a"},{"uuid":"a"}]}"#,
        );
        let reply = ConfigureWan.correlate(&ctx).await.unwrap();
        assert_eq!(reply.status, RequestStatus::Error);
        assert!(reply.body.contains("Duplicate VIMs in vim_list"));
    }

    #[tokio::test]
    async fn test_unattached_vim_rejected() {
        let ctx = context_for(
            "infrastructure.wan.configure",
            r#"{"instance_id":"svc","vim_list":[{"uuid":"lonely"}]}"#,
        );
        let reply = ConfigureWan.correlate(&ctx).await.unwrap();
        assert_eq!(reply.status, RequestStatus::Error);
        assert!(reply.body.contains("VIM lonely is attached"));
    }

    #[tokio::test]
    async fn test_deconfigure_without_wims_completes() {
        let ctx = context_for(
            "infrastructure.wan.deconfigure",
            r#"{"instance_id":"svc"}"#,
        );
        let reply = DeconfigureWan.correlate(&ctx).await.unwrap();
        assert_eq!(reply.status, RequestStatus::Completed);
    }
}
