use crate::features::observability::controller::ObservabilityController;
use crate::features::plugin_lifecycle::service::PluginLifecycleService;
use crate::shared::error::AdaptorResult;
use crate::shared::types::AdaptorState;
use infrabridge_core::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

pub struct PluginLifecycleController {
    service: Arc<PluginLifecycleService>,
    metrics: Arc<ObservabilityController>,
    interval: Duration,
}

impl PluginLifecycleController {
    pub fn new(
        service: Arc<PluginLifecycleService>,
        metrics: Arc<ObservabilityController>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            metrics,
            interval,
        }
    }

    pub fn spawn_heartbeat(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            loop {
                ticker.tick().await;

                match self.service.send_heartbeat().await {
                    Ok(true) => {
                        self.metrics.record_heartbeat();
                        debug!("Heartbeat sent");
                    }
                    Ok(false) => {}
                    Err(error) => warn!(error = %error, "Failed to send heartbeat"),
                }
            }
        })
    }

    pub async fn register(&self) -> AdaptorResult<String> {
        self.service.register().await
    }

    pub async fn deregister(&self) -> AdaptorResult<()> {
        self.service.deregister().await
    }

    pub fn is_handshake_response(&self, message: &Message) -> bool {
        self.service.is_handshake_response(message)
    }

    pub fn complete(&self, message: Message) -> bool {
        self.service.complete(message)
    }

    pub fn mark_stopped(&self) {
        self.service.mark_stopped();
    }

    pub fn state(&self) -> AdaptorState {
        self.service.state()
    }

    pub fn uuid(&self) -> Option<String> {
        self.service.uuid()
    }
}
