//! Tracing setup for the CLI.
//!
//! User-facing output comes from the server's own logger. This only routes
//! the library's internal `tracing` diagnostics, which stay quiet unless
//! `--log-level debug`/`trace` or `RUST_LOG` asks for them.

use devserve::LogLevel;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for a server log level.
pub fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "devserve=trace,devserve_cli=trace",
        LogLevel::Debug => "devserve=debug,devserve_cli=debug",
        LogLevel::Info | LogLevel::Warn => "devserve=warn,devserve_cli=warn",
        LogLevel::Error => "devserve=error,devserve_cli=error",
        LogLevel::Silent => "off",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_logger(level: LogLevel, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .with_writer(std::io::stderr)
        .compact();

    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
