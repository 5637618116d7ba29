use prometheus::{
    opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Registry,
    TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    api_call_total: CounterVec,
    api_call_latency_seconds: HistogramVec,
    pending_calls: Gauge,
    status_updates_published: Gauge,
    status_updates_unrouted: Gauge,
    registered_backends: GaugeVec,
    heartbeat_total: Counter,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let api_call_total = CounterVec::new(
            opts!("infrabridge_api_call_total", "Adaptor API calls by terminal status"),
            &["call", "status"],
        )
        .map_err(|e| e.to_string())?;
        let api_call_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "infrabridge_api_call_latency_seconds",
                "Time from dispatch to terminal reply (seconds)",
            ),
            &["call"],
        )
        .map_err(|e| e.to_string())?;
        let pending_calls = Gauge::with_opts(opts!(
            "infrabridge_pending_calls",
            "Calls dispatched and still waiting for their reply"
        ))
        .map_err(|e| e.to_string())?;
        let status_updates_published = Gauge::with_opts(opts!(
            "infrabridge_status_updates_published",
            "Status updates emitted by backend drivers"
        ))
        .map_err(|e| e.to_string())?;
        let status_updates_unrouted = Gauge::with_opts(opts!(
            "infrabridge_status_updates_unrouted",
            "Status updates for a sid nobody listened to"
        ))
        .map_err(|e| e.to_string())?;
        let registered_backends = GaugeVec::new(
            opts!("infrabridge_registered_backends", "Registered backends"),
            &["category"],
        )
        .map_err(|e| e.to_string())?;
        let heartbeat_total = Counter::with_opts(opts!(
            "infrabridge_heartbeat_total",
            "Heartbeats sent to the plugin manager"
        ))
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(api_call_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_call_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(pending_calls.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(status_updates_published.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(status_updates_unrouted.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(registered_backends.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(heartbeat_total.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            api_call_total,
            api_call_latency_seconds,
            pending_calls,
            status_updates_published,
            status_updates_unrouted,
            registered_backends,
            heartbeat_total,
        })
    }

    pub fn observe_api_call(&self, call: &str, status: &str, seconds: f64) {
        self.api_call_total.with_label_values(&[call, status]).inc();
        self.api_call_latency_seconds
            .with_label_values(&[call])
            .observe(seconds);
    }

    pub fn inc_pending_calls(&self) {
        self.pending_calls.inc();
    }

    pub fn dec_pending_calls(&self) {
        self.pending_calls.dec();
    }

    pub fn set_status_updates(&self, published: u64, unrouted: u64) {
        self.status_updates_published.set(published as f64);
        self.status_updates_unrouted.set(unrouted as f64);
    }

    pub fn set_registered_backends(&self, category: &str, count: f64) {
        self.registered_backends
            .with_label_values(&[category])
            .set(count);
    }

    pub fn inc_heartbeat_total(&self) {
        self.heartbeat_total.inc();
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
