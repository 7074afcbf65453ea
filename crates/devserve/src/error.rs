//! Error types for the development server.
//!
//! The hierarchy mirrors the two ways a `start` attempt can fail:
//! - **`ConfigError`** is raised while resolving options, before any socket
//!   is bound. Contradictory or malformed input always ends up here.
//! - **`ServerError`** is raised while binding or running the listener.
//!
//! Compiler failures are *not* errors in this sense. They travel as
//! `compiler-error` event payloads so that rebuild-on-save keeps working
//! after a broken build.

use thiserror::Error;

/// Top-level error type returned by [`crate::serve`] and [`crate::Server::start`].
#[derive(Debug, Error)]
pub enum Error {
    /// Option resolution failed
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener-level failure
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// I/O errors outside of binding (reading TLS files, env files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
///
/// Each variant carries enough context to point the user at the offending
/// option.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An option has a value of the wrong shape or range
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        /// Name of the option
        field: String,
        /// The rejected value
        value: String,
        /// How to fix it
        hint: String,
    },

    /// A structured flag (`dev`, `hot`) did not parse to an object
    #[error("Expected '{field}' to be an object, got {value}\n\nHint: Pass a JSON object, e.g. --{field} '{{\"logLevel\":\"warn\"}}'")]
    ExpectedObject {
        /// Name of the flag
        field: String,
        /// The parsed value
        value: String,
    },

    /// The hot client would listen on a different host than the server
    #[error("hot.host '{hot}' does not match host '{host}'\n\nHint: The hot client must be bound to the same host as the server")]
    HostMismatch {
        /// Top-level host
        host: String,
        /// Host requested for the hot client
        hot: String,
    },

    /// `http2` was requested but the runtime cannot serve it
    #[error("HTTP/2 is not supported by this build\n\nHint: Rebuild with the `http2` feature or remove the http2 option")]
    Http2Unsupported,

    /// A required option is absent
    #[error("Missing required field: {field}\n\nHint: {hint}")]
    MissingField {
        /// Name of the missing field
        field: String,
        /// How to provide it
        hint: String,
    },

    /// `on` was provided but is not a mapping
    #[error("Expected 'on' to be a mapping of event names to handlers, got {0}")]
    NotAMapping(String),

    /// A value in the `on` mapping is not a handler
    #[error("Handler for '{0}' is not callable\n\nHint: Event handlers can only be registered programmatically")]
    HandlerNotCallable(String),

    /// An event name outside the known set
    #[error("Unknown event '{0}'\n\nHint: Valid events are listening, build-started, build-finished, compiler-warning, compiler-error, close")]
    UnknownEvent(String),

    /// The merged configuration failed to deserialize
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),

    /// A `require`d env file could not be loaded
    #[error("Failed to load '{path}': {message}")]
    Require {
        /// Path that was requested
        path: String,
        /// Loader message
        message: String,
    },
}

/// Listener errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The socket could not be bound (port in use, permission denied)
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The host name did not resolve to any address
    #[error("Could not resolve {0}")]
    Resolve(String),

    /// Certificate or key could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// The hot client failed to start
    #[error("Hot client error: {0}")]
    HotClient(String),

    /// The file watcher could not be set up
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type alias using [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
