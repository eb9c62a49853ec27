use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Counters
    pub rides_created_total: IntCounterVec,
    pub rides_expired_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub trips_total: IntCounterVec,
    pub payments_created_total: IntCounterVec,
    pub psp_calls_total: IntCounterVec,
    pub payments_finalized_total: IntCounterVec,
    pub rate_limited_total: IntCounterVec,
    pub events_published_total: IntCounterVec,

    // Histograms
    pub match_duration_seconds: HistogramVec,
    pub dispatch_iteration_seconds: HistogramVec,

    // Dependency gauges
    pub dep_up: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let rides_created_total = IntCounterVec::new(
            Opts::new("dispatch_rides_created_total", "Rides accepted at intake"),
            &["tier"],
        )
        .expect("metric");

        let rides_expired_total = IntCounterVec::new(
            Opts::new("dispatch_rides_expired_total", "Rides expired with no candidates"),
            &["reason"], // timeout
        )
        .expect("metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("dispatch_assignments_total", "Assignment attempts"),
            &["result"], // assigned|driver_unavailable|conflict|not_matchable|error
        )
        .expect("metric");

        let trips_total = IntCounterVec::new(
            Opts::new("dispatch_trips_total", "Trip lifecycle operations"),
            &["operation", "result"], // accept|start|pause|end|cancel x ok|rejected|error
        )
        .expect("metric");

        let payments_created_total = IntCounterVec::new(
            Opts::new("dispatch_payments_created_total", "Payments created with outbox event"),
            &["method"],
        )
        .expect("metric");

        let psp_calls_total = IntCounterVec::new(
            Opts::new("dispatch_psp_calls_total", "PSP charge submissions"),
            &["result"], // accepted|error
        )
        .expect("metric");

        let payments_finalized_total = IntCounterVec::new(
            Opts::new("dispatch_payments_finalized_total", "Payments reaching a terminal state"),
            &["status", "source"], // COMPLETED|FAILED x webhook|retries_exhausted
        )
        .expect("metric");

        let rate_limited_total = IntCounterVec::new(
            Opts::new("dispatch_rate_limited_total", "Requests rejected by rate limiting"),
            &["scope"], // general|location|payment
        )
        .expect("metric");

        let events_published_total = IntCounterVec::new(
            Opts::new("dispatch_events_published_total", "Domain events published to the bus"),
            &["event_type"],
        )
        .expect("metric");

        let match_duration_seconds = HistogramVec::new(
            HistogramOpts::new("dispatch_match_duration_seconds", "Candidate lookup duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["outcome"], // hit|empty
        )
        .expect("metric");

        let dispatch_iteration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_iteration_seconds",
                "Wall time of one dispatch worker iteration",
            ),
            &["worker"], // dispatch|outbox
        )
        .expect("metric");

        let dep_up = IntGaugeVec::new(
            Opts::new("dispatch_dependency_up", "Dependency up gauge"),
            &["dep"], // db|redis
        )
        .expect("metric");

        for collector in [
            Box::new(rides_created_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(rides_expired_total.clone()),
            Box::new(assignments_total.clone()),
            Box::new(trips_total.clone()),
            Box::new(payments_created_total.clone()),
            Box::new(psp_calls_total.clone()),
            Box::new(payments_finalized_total.clone()),
            Box::new(rate_limited_total.clone()),
            Box::new(events_published_total.clone()),
            Box::new(match_duration_seconds.clone()),
            Box::new(dispatch_iteration_seconds.clone()),
            Box::new(dep_up.clone()),
        ] {
            registry.register(collector).expect("metric registration");
        }

        Self {
            registry,
            rides_created_total,
            rides_expired_total,
            assignments_total,
            trips_total,
            payments_created_total,
            psp_calls_total,
            payments_finalized_total,
            rate_limited_total,
            events_published_total,
            match_duration_seconds,
            dispatch_iteration_seconds,
            dep_up,
        }
    }

    /// Render the registry in Prometheus text exposition format
    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = Metrics::new();
        metrics
            .assignments_total
            .with_label_values(&["assigned"])
            .inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("dispatch_assignments_total"));
    }
}
