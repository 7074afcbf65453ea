use crate::compiler::Compiler;
use crate::error::ConfigError;
use crate::options::defaults::{default_debounce_ms, default_out_dir, default_watch_ignore};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Bundler configuration for one build target.
///
/// The `serve` section carries serve options next to the build settings,
/// the same way a bundler config file would.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BundleConfig {
    /// Display name, used in logs and multi-target stats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Shell command producing the bundle. Without one, `outDir` is served as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Working directory for the command and relative paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Directory the command writes its output to
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Paths watched for changes (relative to `cwd`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<PathBuf>,

    /// Patterns ignored by the watcher
    #[serde(default = "default_watch_ignore")]
    pub ignore: Vec<String>,

    /// Debounce delay for file changes
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Serve options embedded in the bundler configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve: Option<Value>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            name: None,
            command: None,
            cwd: None,
            out_dir: default_out_dir(),
            watch: Vec::new(),
            ignore: default_watch_ignore(),
            debounce_ms: default_debounce_ms(),
            serve: None,
        }
    }
}

impl BundleConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn with_serve(mut self, serve: Value) -> Self {
        self.serve = Some(serve);
        self
    }
}

/// Deferred configuration, awaited before resolution continues.
pub type ConfigFactory =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<ConfigSource, ConfigError>> + Send>;

/// Every shape a caller may hand to the resolver.
pub enum ConfigSource {
    /// A single target
    Raw(BundleConfig),
    /// Several targets built together; serve options come from the first
    Sequence(Vec<BundleConfig>),
    /// A function producing any other source
    Factory(ConfigFactory),
    /// An already constructed compiler
    PrebuiltCompiler(Arc<dyn Compiler>),
}

impl fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Raw(config) => f.debug_tuple("Raw").field(config).finish(),
            ConfigSource::Sequence(configs) => f.debug_tuple("Sequence").field(configs).finish(),
            ConfigSource::Factory(_) => f.write_str("Factory(..)"),
            ConfigSource::PrebuiltCompiler(compiler) => f
                .debug_tuple("PrebuiltCompiler")
                .field(&compiler.name())
                .finish(),
        }
    }
}

impl ConfigSource {
    /// Wrap an async function.
    pub fn factory<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ConfigSource, ConfigError>> + Send + 'static,
    {
        ConfigSource::Factory(Box::new(move || Box::pin(f())))
    }

    /// Wrap a synchronous function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> ConfigSource + Send + 'static,
    {
        ConfigSource::factory(move || async move { Ok(f()) })
    }

    /// Parse a JSON value: an object is one target, an array several.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Array(items) => {
                let configs = items
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<BundleConfig>, _>>()?;
                Ok(ConfigSource::Sequence(configs))
            }
            other => Ok(ConfigSource::Raw(serde_json::from_value(other)?)),
        }
    }
}

impl From<BundleConfig> for ConfigSource {
    fn from(config: BundleConfig) -> Self {
        ConfigSource::Raw(config)
    }
}

impl From<Vec<BundleConfig>> for ConfigSource {
    fn from(configs: Vec<BundleConfig>) -> Self {
        ConfigSource::Sequence(configs)
    }
}
