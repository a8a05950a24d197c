//! Recording facade so call sites in `dispatcher`/`sync` don't need their own
//! `#[cfg(feature = "metrics")]` guards. Compiles to a no-op when the
//! `metrics` feature (and its `metrics-exporter-prometheus` exporter,
//! installed by [`crate::web::metrics::install_recorder`]) is disabled.

pub fn record_queue_depth(lane: &'static str, depth: usize) {
    #[cfg(feature = "metrics")]
    metrics::gauge!("dispatcher_queue_depth", "lane" => lane).set(depth as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = (lane, depth);
}

pub fn record_sync_outcome(service: &'static str, direction: &'static str, outcome: &'static str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(
        "sync_outcomes_total",
        "service" => service,
        "direction" => direction,
        "outcome" => outcome,
    )
    .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (service, direction, outcome);
}
