//! Logging setup shared by the demo binary and the benches
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to executables.

use tracing::Level;

/// Install the default subscriber at INFO level.
///
/// `RUST_LOG` overrides the level, e.g.
/// ```bash
/// RUST_LOG=legged_nlp=debug cargo run --bin monoped_formulation
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the default subscriber with a custom default level
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
///
/// # Example
/// ```no_run
/// use legged_nlp::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// tracing::debug!("evaluation times rebuilt");
/// ```
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    // try_init: benches may install the subscriber more than once
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        // parallel instant evaluation logs from rayon workers
        .with_thread_names(true)
        .try_init();
}
