use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use infrabridge_core::{RequestStatus, WrapperCategory};
use infrabridge_wrappers::status::StatusHub;
use std::sync::Arc;

pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    /// Controller over a fresh registry.
    pub fn with_registry() -> Result<Self, String> {
        let repo = Arc::new(ObservabilityRepository::new()?);
        Ok(Self::new(ObservabilityService::new(repo)))
    }

    pub fn call_started(&self) {
        self.service.call_started();
    }

    pub fn call_finished(&self, call: &str, status: RequestStatus, seconds: f64) {
        self.service.call_finished(call, status, seconds);
    }

    pub fn set_registered_backends(&self, category: WrapperCategory, count: usize) {
        self.service.set_registered_backends(category, count);
    }

    pub fn record_heartbeat(&self) {
        self.service.record_heartbeat();
    }

    /// Renders the registry after pulling the hub's delivery counters.
    pub fn render_metrics(&self, hub: &StatusHub) -> Result<String, String> {
        self.service
            .set_status_updates(hub.published_count(), hub.dropped_count());
        self.service.render_metrics()
    }
}
