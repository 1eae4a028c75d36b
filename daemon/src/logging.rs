//! Logging setup
//!
//! The subscriber's filter sits behind a reload layer so the control
//! channel's debug level can change verbosity without a restart.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Filter directive for a 0-5 debug level
pub fn directive_for_level(level: u8) -> &'static str {
    match level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "info,alarm_receiver_daemon=debug",
        4 => "info,alarm_receiver_daemon=trace",
        _ => "trace",
    }
}

/// Handle for adjusting the active filter
#[derive(Debug, Clone)]
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogControl {
    /// Replace the active filter with the one for `level`
    pub fn apply(&self, level: u8) -> Result<(), reload::Error> {
        self.handle.reload(EnvFilter::new(directive_for_level(level)))
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `debug_level`
/// until the level is changed at runtime.
pub fn init(debug_level: u8) -> LogControl {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive_for_level(debug_level)));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .init();

    LogControl { handle }
}
