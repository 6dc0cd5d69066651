//! Diagnostic logging for the `bcl` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the host.  The runner calls [`init_tracing`] once at startup.

use std::sync::Once;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "BCL_LOG";

static TRACING_INIT: Once = Once::new();

/// Pick the filter directives: `-d` forces `debug`, otherwise `BCL_LOG`,
/// then `RUST_LOG`.  `None` means logging stays off.
fn filter_directives(debug: bool, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    if debug {
        return Some("debug".to_owned());
    }
    lookup(LOG_ENV).or_else(|| lookup("RUST_LOG"))
}

/// Install the stderr subscriber.  Later calls are no-ops.
pub fn init_tracing(debug: bool) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let Some(directives) = filter_directives(debug, |k| std::env::var(k).ok()) else {
            return;
        };
        let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    });
}
