use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FUNCACHE_LOG";

/// Installs the global subscriber. The filter comes from `FUNCACHE_LOG`, or
/// from `verbose` (0 = warn, 1 = info, 2+ = debug) when that is unset.
/// Later calls are ignored.
pub fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("funcache=warn"),
        1 => EnvFilter::new("funcache=info"),
        _ => EnvFilter::new("funcache=debug"),
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
