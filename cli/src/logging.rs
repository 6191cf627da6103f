//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Logs go to stderr so stdout stays clean for listings. `RUST_LOG` is
/// honoured unless `verbose` forces debug output.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // A second initialization (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
