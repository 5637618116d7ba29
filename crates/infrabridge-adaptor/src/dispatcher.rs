//! Single consumer of the bus ingress.
//!
//! Messages are taken in delivery order. Handshake responses are handed to the
//! plugin lifecycle inline; calls under `infrastructure.` get a correlator task
//! each; anything else is dropped.

use crate::correlator::{correlator_for, spawn_call, CallContext, ReplySink};
use crate::features::backend_management::controller::BackendManagementController;
use crate::features::observability::controller::ObservabilityController;
use crate::features::plugin_lifecycle::controller::PluginLifecycleController;
use infrabridge_core::Message;
use infrabridge_wrappers::status::StatusHub;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the dispatcher did with one message.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatched {
    Handshake,
    Call(&'static str),
    Discarded,
}

pub struct Dispatcher {
    lifecycle: Arc<PluginLifecycleController>,
    management: Arc<BackendManagementController>,
    status: StatusHub,
    replies: ReplySink,
    metrics: Arc<ObservabilityController>,
    stop: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(
        lifecycle: Arc<PluginLifecycleController>,
        management: Arc<BackendManagementController>,
        status: StatusHub,
        replies: ReplySink,
        metrics: Arc<ObservabilityController>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            lifecycle,
            management,
            status,
            replies,
            metrics,
            stop,
        }
    }

    /// Routes one message. Correlators run detached; their reply goes to the sink.
    pub fn dispatch(&self, message: Message) -> Dispatched {
        if self.lifecycle.is_handshake_response(&message) {
            debug!(topic = %message.topic, sid = %message.sid, "Handshake response");
            if !self.lifecycle.complete(message) {
                warn!("Handshake response arrived after its request was abandoned");
            }
            return Dispatched::Handshake;
        }

        let Some(correlator) = correlator_for(&message.topic) else {
            debug!(topic = %message.topic, sid = %message.sid, "Discarding foreign message");
            return Dispatched::Discarded;
        };
        let call = correlator.call();
        let ctx = CallContext::new(message, self.management.clone(), self.status.clone());
        spawn_call(correlator, ctx, self.replies.clone(), self.metrics.clone());
        Dispatched::Call(call)
    }

    /// Consumes `ingress` until it closes or [`Dispatcher::stop`] is called.
    ///
    /// The stop flag is checked between messages, so a message already taken
    /// off the queue is always routed.
    pub fn spawn(self: Arc<Self>, mut ingress: mpsc::UnboundedReceiver<Message>) -> JoinHandle<()> {
        let mut stopped = self.stop.subscribe();
        tokio::spawn(async move {
            info!("Dispatcher started");
            loop {
                if *stopped.borrow() {
                    break;
                }
                tokio::select! {
                    message = ingress.recv() => match message {
                        Some(message) => {
                            self.dispatch(message);
                        }
                        None => {
                            info!("Ingress closed");
                            break;
                        }
                    },
                    _ = stopped.changed() => {}
                }
            }
            info!("Dispatcher stopped");
        })
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}
