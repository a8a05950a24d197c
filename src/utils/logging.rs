use tracing_subscriber::{EnvFilter, fmt};

/// Initializes the global tracing subscriber. `RUST_LOG` takes precedence
/// over the config-file log level, matching the teacher's "env wins" policy.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
