//! Prometheus exposition, gated behind the `metrics` feature exactly as the
//! teacher gates its own `metrics`/`metrics-exporter-prometheus` optional
//! dependencies. The gauges/counters themselves are recorded through
//! `crate::metrics`'s always-compiled wrapper functions (dispatcher queue
//! depth in `dispatcher::note_push`, sync outcomes in the `sync` services),
//! so this module only owns installing and rendering the exporter.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use salvo::prelude::*;
use salvo::writing::Text;

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global `metrics` recorder. Called once from `main` when the
/// `metrics` feature is enabled, before anything records a counter.
pub fn install_recorder() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder")
        })
        .clone()
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    let handle = RECORDER.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install prometheus recorder")
    });
    res.render(Text::Plain(handle.render()));
}
