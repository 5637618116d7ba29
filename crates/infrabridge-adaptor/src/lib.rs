pub mod bus;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod features;
pub mod shared;

use crate::bus::MessageBus;
use crate::config::AdaptorConfig;
use crate::dispatcher::Dispatcher;
use crate::features::backend_management::controller::BackendManagementController;
use crate::features::backend_management::service::BackendRegistry;
use crate::features::observability::controller::ObservabilityController;
use crate::features::plugin_lifecycle::controller::PluginLifecycleController;
use crate::features::plugin_lifecycle::service::{PluginDescriptor, PluginLifecycleService};
use crate::shared::error::{AdaptorError, AdaptorResult};
use crate::shared::types::AdaptorState;
use infrabridge_core::Message;
use infrabridge_wrappers::status::StatusHub;
use infrabridge_wrappers::{WrapperContext, WrapperFactory};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const PLUGIN_DESCRIPTION: &str = "Infrastructure adaptor for compute, network and WAN backends";

#[derive(Default)]
struct Tasks {
    publisher: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// The running adaptor: bus, dispatcher, backend registry and plugin lifecycle.
pub struct Adaptor {
    bus: Arc<dyn MessageBus>,
    management: Arc<BackendManagementController>,
    lifecycle: Arc<PluginLifecycleController>,
    metrics: Arc<ObservabilityController>,
    dispatcher: Arc<Dispatcher>,
    status: StatusHub,
    replies: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    tasks: Mutex<Tasks>,
}

impl Adaptor {
    /// Adaptor over the default driver table and an in-memory repository.
    pub fn new(config: &AdaptorConfig, bus: Arc<dyn MessageBus>) -> AdaptorResult<Self> {
        let registry =
            BackendRegistry::new(WrapperFactory::with_defaults(), WrapperContext::in_memory());
        Self::with_registry(config, bus, registry)
    }

    pub fn with_registry(
        config: &AdaptorConfig,
        bus: Arc<dyn MessageBus>,
        registry: BackendRegistry,
    ) -> AdaptorResult<Self> {
        let metrics =
            Arc::new(ObservabilityController::with_registry().map_err(AdaptorError::Metrics)?);
        let status = registry.context().status.clone();
        let management = Arc::new(BackendManagementController::new(
            Arc::new(registry),
            metrics.clone(),
        ));

        let service = Arc::new(PluginLifecycleService::new(
            bus.clone(),
            PluginDescriptor {
                name: config.plugin_name.clone(),
                version: config.plugin_version.clone(),
                description: PLUGIN_DESCRIPTION.to_string(),
            },
            config.handshake_timeout,
        ));
        let lifecycle = Arc::new(PluginLifecycleController::new(
            service,
            metrics.clone(),
            config.heartbeat_interval,
        ));

        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(
            lifecycle.clone(),
            management.clone(),
            status.clone(),
            replies_tx,
            metrics.clone(),
        ));

        Ok(Self {
            bus,
            management,
            lifecycle,
            metrics,
            dispatcher,
            status,
            replies: Mutex::new(Some(replies_rx)),
            tasks: Mutex::new(Tasks::default()),
        })
    }

    /// Connects to the bus, starts dispatching and registers with the plugin manager.
    ///
    /// A refused or unanswered registration leaves the adaptor serving calls in
    /// READY state, without heartbeats.
    pub async fn start(&self) -> AdaptorResult<()> {
        let replies = self
            .replies
            .lock()
            .map_err(|_| AdaptorError::Bus("Lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| AdaptorError::Bus("adaptor already started".to_string()))?;
        let publisher = spawn_publisher(self.bus.clone(), replies);

        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        self.bus.subscribe(ingress_tx).await?;
        let dispatcher = self.dispatcher.clone().spawn(ingress_rx);
        self.set_tasks(|tasks| {
            tasks.publisher = Some(publisher);
            tasks.dispatcher = Some(dispatcher);
        });

        match self.lifecycle.register().await {
            Ok(uuid) => info!(uuid = %uuid, "Adaptor running"),
            Err(e) => warn!(error = %e, "Registration failed, serving calls unregistered"),
        }

        let heartbeat = self.lifecycle.clone().spawn_heartbeat();
        self.set_tasks(|tasks| tasks.heartbeat = Some(heartbeat));
        Ok(())
    }

    /// Deregisters, then stops heartbeat, dispatcher and publisher.
    ///
    /// Returns the deregistration outcome once every task is stopped.
    pub async fn stop(&self) -> AdaptorResult<()> {
        let deregistered = self.lifecycle.deregister().await;
        if let Err(e) = &deregistered {
            warn!(error = %e, "Deregistration failed");
        }

        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        if let Some(heartbeat) = tasks.heartbeat {
            heartbeat.abort();
        }
        self.dispatcher.stop();
        if let Some(dispatcher) = tasks.dispatcher {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "Dispatcher task ended abnormally");
            }
        }
        if let Err(e) = self.bus.close().await {
            warn!(error = %e, "Unable to close the bus connection");
        }
        if let Some(publisher) = tasks.publisher {
            publisher.abort();
        }

        self.lifecycle.mark_stopped();
        info!(state = %self.state(), "Adaptor stopped");
        deregistered
    }

    pub fn state(&self) -> AdaptorState {
        self.lifecycle.state()
    }

    pub fn plugin_uuid(&self) -> Option<String> {
        self.lifecycle.uuid()
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        self.management.registry()
    }

    pub fn render_metrics(&self) -> AdaptorResult<String> {
        self.metrics
            .render_metrics(&self.status)
            .map_err(AdaptorError::Metrics)
    }

    fn set_tasks(&self, f: impl FnOnce(&mut Tasks)) {
        if let Ok(mut tasks) = self.tasks.lock() {
            f(&mut tasks);
        }
    }
}

/// Drains the reply queue onto the bus.
fn spawn_publisher(
    bus: Arc<dyn MessageBus>,
    mut replies: mpsc::UnboundedReceiver<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = replies.recv().await {
            let (topic, sid) = (message.topic.clone(), message.sid.clone());
            if let Err(e) = bus.publish(message).await {
                warn!(topic = %topic, sid = %sid, error = %e, "Unable to publish reply");
            }
        }
    })
}
