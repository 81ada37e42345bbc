use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise info everywhere. Later calls are ignored.
pub fn init() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
