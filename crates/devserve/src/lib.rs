#![cfg_attr(docsrs, feature(doc_cfg))]

//! # devserve
//!
//! Development server core: takes a bundle configuration and a set of
//! command-line style flags, resolves them into one canonical option set,
//! and runs an HTTP server that serves the compiler's output with live
//! reload notifications.
//!
//! ## Pieces
//!
//! - **Options** ([`options`]): merges defaults, the configuration's `serve`
//!   section and flags, validating everything before a socket is bound
//! - **Event bus** ([`bus`]): `listening`, `build-started`,
//!   `build-finished`, `compiler-warning`, `compiler-error`, `close`
//! - **Compiler adapter** ([`compiler`]): turns compiler hook calls into bus
//!   events and watches sources for rebuilds
//! - **Server** ([`server`]): middleware chain, listener, hot client and
//!   orderly shutdown
//!
//! ## Quick Start
//!
//! ```no_run
//! use devserve::{serve, BundleConfig, Flags};
//!
//! # #[tokio::main]
//! # async fn main() -> devserve::Result<()> {
//! let config = BundleConfig::new("npm run build");
//! let server = serve(config.into(), Flags::default()).await?;
//! println!("listening on {}", server.url());
//!
//! tokio::signal::ctrl_c().await?;
//! server.close().await;
//! # Ok(()) }
//! ```

pub mod bus;
pub mod collaborators;
pub mod compiler;
pub mod error;
pub mod hot;
pub mod logger;
pub mod middleware;
pub mod options;
pub mod server;

pub use bus::{Event, EventBus, EventKind, Subscriptions};
pub use compiler::{Compiler, Stats, StatsSummary};
pub use error::{ConfigError, Error, Result, ServerError};
pub use logger::{LogLevel, Logger};
pub use middleware::{Middleware, MiddlewareRegistry, Outcome};
pub use options::{BundleConfig, ConfigSource, Flags, Options};
pub use server::{Collaborators, LifecycleState, Server, ServerHandle, ServerInfo};

/// Resolve `source` and `flags`, then start a server with the default
/// collaborators.
///
/// Env files named in `flags.require` are loaded first, so factories in
/// `source` can read them.
///
/// # Errors
///
/// Fails on unreadable env files, invalid options, or when the server cannot
/// start. No socket stays bound after a failure.
pub async fn serve(source: ConfigSource, flags: Flags) -> Result<ServerHandle> {
    for path in &flags.require {
        dotenvy::from_path(path).map_err(|e| ConfigError::Require {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    }

    let options = options::resolve(source, flags).await?;
    Server::new(options).start().await
}
