use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_attempts_total: IntCounterVec,
    pub ride_transitions_total: IntCounterVec,
    pub matching_latency_seconds: HistogramVec,
    pub pending_offers: IntGauge,
    pub dispatch_commands_in_queue: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_attempts_total = IntCounterVec::new(
            Opts::new("dispatch_attempts_total", "Assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_attempts_total metric");

        let ride_transitions_total = IntCounterVec::new(
            Opts::new("ride_transitions_total", "Ride state transitions by new status"),
            &["status"],
        )
        .expect("valid ride_transitions_total metric");

        let matching_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "matching_latency_seconds",
                "Latency of one assignment attempt in seconds",
            ),
            &["outcome"],
        )
        .expect("valid matching_latency_seconds metric");

        let pending_offers = IntGauge::new(
            "pending_offers",
            "Rides currently waiting on a driver's answer",
        )
        .expect("valid pending_offers metric");

        let dispatch_commands_in_queue = IntGauge::new(
            "dispatch_commands_in_queue",
            "Dispatch commands waiting for the engine",
        )
        .expect("valid dispatch_commands_in_queue metric");

        registry
            .register(Box::new(dispatch_attempts_total.clone()))
            .expect("register dispatch_attempts_total");
        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(matching_latency_seconds.clone()))
            .expect("register matching_latency_seconds");
        registry
            .register(Box::new(pending_offers.clone()))
            .expect("register pending_offers");
        registry
            .register(Box::new(dispatch_commands_in_queue.clone()))
            .expect("register dispatch_commands_in_queue");

        Self {
            registry,
            dispatch_attempts_total,
            ride_transitions_total,
            matching_latency_seconds,
            pending_offers,
            dispatch_commands_in_queue,
        }
    }

    pub fn record_transition(&self, status: &str) {
        self.ride_transitions_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
