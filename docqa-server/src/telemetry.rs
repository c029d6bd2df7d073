//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Initialise console logging.
///
/// `RUST_LOG` overrides the default `info` level. Safe to call more than
/// once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
