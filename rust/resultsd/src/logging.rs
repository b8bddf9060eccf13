use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static TRACING_INIT: Once = Once::new();

/// Filter variable, EnvFilter syntax.
pub const LOG_ENV: &str = "RESULTSD_LOG";
const DEFAULT_FILTER: &str = "resultsd=info";

/// Installs the global subscriber. Output goes to stderr: stdout carries the
/// IPC responses.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}
