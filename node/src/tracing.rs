use tracing_subscriber::EnvFilter;

/// Falls back to `info` for this crate when `RUST_LOG` is unset.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zchannel_node=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .ok();
}
