//! Call correlators: one per API call type.
//!
//! A correlator turns one bus request into exactly one reply. Synchronous
//! calls answer from the registry. Asynchronous ones subscribe to the
//! [`StatusHub`] for the request sid *before* invoking the backend and wait
//! for the matching update(s).

pub mod function;
pub mod management;
pub mod service;
pub mod wan;

use crate::features::backend_management::controller::BackendManagementController;
use crate::features::backend_management::service::BackendRegistry;
use crate::features::observability::controller::ObservabilityController;
use crate::shared::error::{AdaptorError, AdaptorResult};
use crate::shared::types::{CallReply, INFRASTRUCTURE_PREFIX};
use async_trait::async_trait;
use infrabridge_core::payload::RemoveBranchOutcome;
use infrabridge_core::{ApiResponse, Message, RequestStatus, StatusUpdate, WrapperCategory};
use infrabridge_wrappers::status::StatusHub;
use infrabridge_wrappers::Subscription;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue of outbound messages, drained by the adaptor's publisher task.
pub type ReplySink = mpsc::UnboundedSender<Message>;

/// Everything a correlator may touch while handling one request.
#[derive(Clone)]
pub struct CallContext {
    pub message: Message,
    pub management: Arc<BackendManagementController>,
    pub status: StatusHub,
}

impl CallContext {
    pub fn new(
        message: Message,
        management: Arc<BackendManagementController>,
        status: StatusHub,
    ) -> Self {
        Self {
            message,
            management,
            status,
        }
    }

    pub fn sid(&self) -> &str {
        &self.message.sid
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        self.management.registry()
    }

    pub fn parse<T: DeserializeOwned>(&self) -> AdaptorResult<T> {
        self.message.parse_body().map_err(|e| {
            warn!(sid = %self.sid(), topic = %self.message.topic, error = %e, "Unable to parse the payload received");
            AdaptorError::from(e)
        })
    }

    pub fn subscribe(&self) -> Subscription {
        self.status.subscribe(self.sid())
    }
}

#[async_trait]
pub trait CallCorrelator: Send + Sync {
    /// Short call name, used as metric label.
    fn call(&self) -> &'static str;

    async fn correlate(&self, ctx: &CallContext) -> AdaptorResult<CallReply>;
}

/// Answers a claimed topic that has no handler.
pub struct Unsupported {
    reason: String,
}

impl Unsupported {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CallCorrelator for Unsupported {
    fn call(&self) -> &'static str {
        "unsupported"
    }

    async fn correlate(&self, _ctx: &CallContext) -> AdaptorResult<CallReply> {
        Ok(CallReply::error(self.reason.clone()))
    }
}

/// Correlator for a topic under `infrastructure.`, or None for a foreign topic.
pub fn correlator_for(topic: &str) -> Option<Box<dyn CallCorrelator>> {
    let call = topic.strip_prefix(INFRASTRUCTURE_PREFIX)?;
    let correlator: Box<dyn CallCorrelator> = match call {
        "management.compute.add" => Box::new(management::AddBackend(WrapperCategory::Compute)),
        "management.network.add" => Box::new(management::AddBackend(WrapperCategory::Network)),
        "management.wan.add" => Box::new(management::AddBackend(WrapperCategory::Wan)),
        "management.compute.remove" => {
            Box::new(management::RemoveBackend(WrapperCategory::Compute))
        }
        "management.network.remove" => {
            Box::new(management::RemoveBackend(WrapperCategory::Network))
        }
        "management.wan.remove" => Box::new(management::RemoveBackend(WrapperCategory::Wan)),
        "management.compute.list" => Box::new(management::ListCompute),
        "management.network.list" => {
            Box::new(management::ListBackends(WrapperCategory::Network))
        }
        "management.wan.list" => Box::new(management::ListBackends(WrapperCategory::Wan)),
        "management.compute.resourceAvailability" => Box::new(management::ResourceAvailability),
        "management.wan.attach" => Box::new(management::AttachVim),
        "service.prepare" => Box::new(service::PrepareService),
        "service.remove" => Box::new(service::RemoveService),
        "service.chain.configure" => Box::new(service::ConfigureNetwork),
        "service.chain.deconfigure" => Box::new(service::DeconfigureNetwork),
        "service.deploy" => Box::new(Unsupported::new(
            "service.deploy is not supported: prepare the service, then use infrastructure.function.deploy",
        )),
        "function.deploy" => Box::new(function::DeployFunction),
        "function.scale" => Box::new(function::ScaleFunction),
        "cloud_service.deploy" => Box::new(function::DeployCloudService),
        "wan.configure" => Box::new(wan::ConfigureWan),
        "wan.deconfigure" => Box::new(wan::DeconfigureWan),
        _ => Box::new(Unsupported::new(format!("unsupported API call: {topic}"))),
    };
    Some(correlator)
}

/// Runs `correlator` on its own task and publishes its single reply.
pub fn spawn_call(
    correlator: Box<dyn CallCorrelator>,
    ctx: CallContext,
    replies: ReplySink,
    metrics: Arc<ObservabilityController>,
) -> JoinHandle<()> {
    metrics.call_started();
    tokio::spawn(async move {
        let started = Instant::now();
        let call = correlator.call();
        info!(sid = %ctx.sid(), call = %call, "Received API call");

        let reply = match correlator.correlate(&ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(sid = %ctx.sid(), call = %call, error = %e, "API call failed");
                CallReply::from(ApiResponse::from(e))
            }
        };

        metrics.call_finished(call, reply.status, started.elapsed().as_secs_f64());
        debug!(sid = %ctx.sid(), status = %reply.status, "Sending back response");
        if replies.send(ctx.message.reply(reply.body)).is_err() {
            warn!(sid = %ctx.sid(), "Reply dropped: publisher stopped");
        }
    })
}

/// Waits for the terminal update of a single-backend call.
pub(crate) async fn await_single(subscription: &mut Subscription) -> AdaptorResult<CallReply> {
    let update = subscription.recv().await.ok_or_else(|| {
        AdaptorError::Handshake(format!("status channel closed for {}", subscription.sid()))
    })?;
    Ok(single_reply(update))
}

/// SUCCESS forwards the driver's body, ERROR wraps it in an error reply.
pub(crate) fn single_reply(update: StatusUpdate) -> CallReply {
    if update.is_success() {
        CallReply::new(RequestStatus::Completed, update.body)
    } else {
        warn!(sid = %update.sid, "Pushing back error");
        CallReply::error(update.body)
    }
}

/// Completion state of a call fanned out over several backends.
///
/// Every branch ends with exactly one update. A SUCCESS must name a pending
/// backend in its body; an ERROR, or a SUCCESS for an unexpected backend,
/// marks the whole call failed.
#[derive(Debug)]
pub struct FanOutTracker {
    pending: HashSet<String>,
    remaining: usize,
    failed: bool,
}

impl FanOutTracker {
    pub fn new<I: IntoIterator<Item = String>>(backends: I) -> Self {
        let pending: HashSet<String> = backends.into_iter().collect();
        Self {
            remaining: pending.len(),
            pending,
            failed: false,
        }
    }

    /// A branch that failed before it could emit an update.
    pub fn fail_branch(&mut self, backend: &str) {
        if self.pending.remove(backend) {
            self.remaining -= 1;
        }
        self.failed = true;
    }

    pub fn observe(&mut self, update: &StatusUpdate) {
        if self.remaining == 0 {
            return;
        }
        self.remaining -= 1;
        if !update.is_success() {
            warn!(sid = %update.sid, body = %update.body, "Branch failed");
            self.failed = true;
            return;
        }
        match serde_json::from_str::<RemoveBranchOutcome>(&update.body) {
            Ok(outcome) if self.pending.remove(&outcome.wrapper_uuid) => {}
            _ => {
                warn!(sid = %update.sid, body = %update.body, "Unexpected branch update");
                self.failed = true;
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    pub fn outcome(&self) -> RequestStatus {
        if self.failed {
            RequestStatus::Error
        } else {
            RequestStatus::Completed
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use infrabridge_wrappers::{WrapperContext, WrapperFactory};

    pub(crate) fn context_for(topic: &str, body: &str) -> CallContext {
        context_with_factory(WrapperFactory::with_defaults(), topic, body)
    }

    pub(crate) fn context_with_factory(
        factory: WrapperFactory,
        topic: &str,
        body: &str,
    ) -> CallContext {
        let registry = Arc::new(BackendRegistry::new(factory, WrapperContext::in_memory()));
        let management = Arc::new(BackendManagementController::new(
            registry.clone(),
            Arc::new(ObservabilityController::with_registry().unwrap()),
        ));
        let status = registry.context().status.clone();
        CallContext::new(Message::request(topic, body), management, status)
    }

    pub(crate) fn with_message(ctx: &CallContext, topic: &str, body: &str) -> CallContext {
        CallContext::new(
            Message::request(topic, body),
            ctx.management.clone(),
            ctx.status.clone(),
        )
    }

    fn branch_success(sid: &str, backend: &str) -> StatusUpdate {
        StatusUpdate::success(
            sid,
            serde_json::to_string(&RemoveBranchOutcome {
                status: "SUCCESS".into(),
                wrapper_uuid: backend.into(),
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_correlator_classification() {
        assert_eq!(
            correlator_for("infrastructure.management.compute.add")
                .unwrap()
                .call(),
            "management.add"
        );
        assert_eq!(
            correlator_for("infrastructure.service.chain.configure")
                .unwrap()
                .call(),
            "service.chain.configure"
        );
        assert_eq!(
            correlator_for("infrastructure.monitoring.compute")
                .unwrap()
                .call(),
            "unsupported"
        );
        assert!(correlator_for("platform.management.plugin.register").is_none());
        assert!(correlator_for("service.instances.create").is_none());
    }

    #[test]
    fn test_fan_out_all_success() {
        let mut tracker = FanOutTracker::new(vec!["a".to_string(), "b".to_string()]);
        tracker.observe(&branch_success("s", "b"));
        assert!(!tracker.is_done());
        tracker.observe(&branch_success("s", "a"));
        assert!(tracker.is_done());
        assert_eq!(tracker.outcome(), RequestStatus::Completed);
    }

    #[test]
    fn test_fan_out_single_error_fails_call() {
        let mut tracker =
            FanOutTracker::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        tracker.observe(&branch_success("s", "a"));
        tracker.observe(&StatusUpdate::error("s", "stack delete failed"));
        assert!(!tracker.is_done());
        tracker.observe(&branch_success("s", "c"));
        assert!(tracker.is_done());
        assert_eq!(tracker.outcome(), RequestStatus::Error);
    }

    #[test]
    fn test_fan_out_unknown_backend_fails_call() {
        let mut tracker = FanOutTracker::new(vec!["a".to_string()]);
        tracker.observe(&branch_success("s", "z"));
        assert!(tracker.is_done());
        assert_eq!(tracker.outcome(), RequestStatus::Error);
    }

    #[test]
    fn test_fan_out_failed_branch_counts_once() {
        let mut tracker = FanOutTracker::new(vec!["a".to_string(), "b".to_string()]);
        tracker.fail_branch("a");
        tracker.fail_branch("a");
        assert!(!tracker.is_done());
        tracker.observe(&branch_success("s", "b"));
        assert!(tracker.is_done());
        assert_eq!(tracker.outcome(), RequestStatus::Error);
    }

    #[tokio::test]
    async fn test_spawn_call_replies_once_on_reply_topic() {
        let ctx = context_for("infrastructure.foo.bar", "{}");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(ObservabilityController::with_registry().unwrap());

        spawn_call(
            correlator_for("infrastructure.foo.bar").unwrap(),
            ctx.clone(),
            tx,
            metrics,
        )
        .await
        .unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.sid, ctx.message.sid);
        assert_eq!(reply.topic, ctx.message.reply_topic());
        let body: ApiResponse = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(body.request_status, RequestStatus::Error);
        assert!(body.message.contains("unsupported API call"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_parse_error_becomes_error_reply() {
        let ctx = context_for("infrastructure.function.deploy", "not json");
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_call(
            correlator_for("infrastructure.function.deploy").unwrap(),
            ctx,
            tx,
            Arc::new(ObservabilityController::with_registry().unwrap()),
        )
        .await
        .unwrap();

        let body: ApiResponse = serde_json::from_str(&rx.recv().await.unwrap().body).unwrap();
        assert_eq!(body.message, "Unable to parse API payload");
    }
}
