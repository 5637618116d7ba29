use crate::features::observability::repo::ObservabilityRepository;
use infrabridge_core::{RequestStatus, WrapperCategory};
use std::sync::Arc;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn call_started(&self) {
        self.repo.inc_pending_calls();
    }

    pub fn call_finished(&self, call: &str, status: RequestStatus, seconds: f64) {
        self.repo.dec_pending_calls();
        self.repo
            .observe_api_call(call, &status.to_string(), seconds);
    }

    pub fn set_status_updates(&self, published: u64, unrouted: u64) {
        self.repo.set_status_updates(published, unrouted);
    }

    pub fn set_registered_backends(&self, category: WrapperCategory, count: usize) {
        self.repo
            .set_registered_backends(category.as_str(), count as f64);
    }

    pub fn record_heartbeat(&self) {
        self.repo.inc_heartbeat_total();
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
