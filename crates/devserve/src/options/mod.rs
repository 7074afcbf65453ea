//! Option resolution.
//!
//! Three layers are merged into one [`Options`] record, highest precedence
//! first:
//!
//! 1. [`Flags`] from the command line or the embedding program
//! 2. the `serve` section of the (first) bundler configuration
//! 3. built-in defaults, see [`defaults::default_serve`]
//!
//! Objects such as `dev` and `hot` are merged key by key, everything else is
//! replaced. Resolution never touches the caller's configuration values; it
//! works on clones and hands back a fresh record.

pub mod defaults;
mod flags;
mod resolve;
mod source;

pub use flags::Flags;
pub use resolve::{parse, resolve};
pub use source::{BundleConfig, ConfigFactory, ConfigSource};

use crate::bus::Subscriptions;
use crate::compiler::{BlockingPolicy, Compiler};
use crate::logger::LogLevel;
use crate::middleware::MiddlewareRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Hook that registers middleware ahead of the built-ins.
pub type AddHook = Arc<dyn Fn(&mut MiddlewareRegistry) + Send + Sync>;

/// TLS material for HTTPS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TlsOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfx: Option<PathBuf>,
}

impl TlsOptions {
    pub fn is_empty(&self) -> bool {
        self.cert.is_none() && self.key.is_none() && self.passphrase.is_none() && self.pfx.is_none()
    }
}

/// Hot client configuration after normalisation.
#[derive(Debug, Clone, PartialEq)]
pub enum HotOption {
    Disabled,
    Enabled(Map<String, Value>),
}

impl HotOption {
    pub fn is_enabled(&self) -> bool {
        matches!(self, HotOption::Enabled(_))
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            HotOption::Enabled(map) => Some(map),
            HotOption::Disabled => None,
        }
    }
}

/// Browser opening configuration after normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOption {
    Disabled,
    Enabled {
        /// Application (and its arguments) to open the URL with
        app: Vec<String>,
        /// Path appended to the server URL
        path: Option<String>,
    },
}

impl OpenOption {
    pub fn is_enabled(&self) -> bool {
        matches!(self, OpenOption::Enabled { .. })
    }
}

/// Canonical server options.
///
/// Built once by [`resolve`] and shared as `Arc<Options>` afterwards.
#[derive(Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub http2: bool,
    pub https: Option<TlsOptions>,
    pub content: Vec<PathBuf>,
    pub dev: Map<String, Value>,
    pub hot: HotOption,
    pub log_level: LogLevel,
    pub log_time: bool,
    pub open: OpenOption,
    pub clipboard: bool,
    /// Treat compiler warnings as blocking, like errors
    pub warnings_as_errors: bool,
    pub add: Option<AddHook>,
    pub compiler: Option<Arc<dyn Compiler>>,
    pub on: Subscriptions,
    /// Compilable targets, used when no compiler was injected
    pub targets: Vec<BundleConfig>,
}

impl Options {
    pub fn blocking_policy(&self) -> BlockingPolicy {
        if self.warnings_as_errors {
            BlockingPolicy::ErrorsAndWarnings
        } else {
            BlockingPolicy::Errors
        }
    }

    pub fn is_https(&self) -> bool {
        self.https.is_some()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("http2", &self.http2)
            .field("https", &self.https)
            .field("content", &self.content)
            .field("dev", &self.dev)
            .field("hot", &self.hot)
            .field("log_level", &self.log_level)
            .field("log_time", &self.log_time)
            .field("open", &self.open)
            .field("clipboard", &self.clipboard)
            .field("warnings_as_errors", &self.warnings_as_errors)
            .field("add", &self.add.is_some())
            .field("compiler", &self.compiler.as_ref().map(|c| c.name().to_string()))
            .field("on", &self.on)
            .field("targets", &self.targets)
            .finish()
    }
}
