use crate::bus::Subscriptions;
use crate::error::ConfigError;
use crate::logger::LogLevel;
use crate::options::resolve::parse;
use crate::options::AddHook;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Highest-precedence option layer.
///
/// Structured values (`dev`, `hot`, `open_app`) arrive as strings, the way a
/// shell hands them over, and are parsed as JSON during resolution.
#[derive(Clone, Default)]
pub struct Flags {
    pub content: Vec<PathBuf>,
    pub dev: Option<String>,
    pub hot: Option<String>,
    pub no_hot_client: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub http2: bool,
    pub https_cert: Option<PathBuf>,
    pub https_key: Option<PathBuf>,
    pub https_passphrase: Option<String>,
    pub https_pfx: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    pub log_time: bool,
    pub open: bool,
    pub open_app: Option<String>,
    pub open_path: Option<String>,
    /// Env files loaded before resolution
    pub require: Vec<PathBuf>,
    /// `Some(false)` disables copying the URL to the clipboard
    pub clipboard: Option<bool>,
    pub warnings_as_errors: bool,
    pub add: Option<AddHook>,
    pub on: Subscriptions,
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flags")
            .field("content", &self.content)
            .field("dev", &self.dev)
            .field("hot", &self.hot)
            .field("no_hot_client", &self.no_hot_client)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("http2", &self.http2)
            .field("https_cert", &self.https_cert)
            .field("https_key", &self.https_key)
            .field("https_pfx", &self.https_pfx)
            .field("log_level", &self.log_level)
            .field("log_time", &self.log_time)
            .field("open", &self.open)
            .field("open_app", &self.open_app)
            .field("open_path", &self.open_path)
            .field("require", &self.require)
            .field("clipboard", &self.clipboard)
            .field("warnings_as_errors", &self.warnings_as_errors)
            .field("add", &self.add.is_some())
            .field("on", &self.on)
            .finish_non_exhaustive()
    }
}

impl Flags {
    /// Render the flags that were actually given as a JSON overlay.
    ///
    /// Boolean switches only appear when set, so an absent `--http2` never
    /// overrides `http2: true` from a config file.
    pub(crate) fn to_overlay(&self) -> Result<Value, ConfigError> {
        let mut overlay = Map::new();

        if !self.content.is_empty() {
            overlay.insert("content".into(), serde_json::to_value(&self.content)?);
        }

        if let Some(dev) = self.dev.as_deref() {
            if let Some(value) = object_flag("dev", dev)? {
                overlay.insert("dev".into(), value);
            }
        }

        if self.no_hot_client {
            overlay.insert("hot".into(), Value::Bool(false));
        } else if let Some(hot) = self.hot.as_deref() {
            if let Some(value) = object_flag("hot", hot)? {
                overlay.insert("hot".into(), value);
            }
        }

        if let Some(host) = &self.host {
            overlay.insert("host".into(), Value::String(host.clone()));
        }
        if let Some(port) = self.port {
            overlay.insert("port".into(), Value::from(port));
        }
        if self.http2 {
            overlay.insert("http2".into(), Value::Bool(true));
        }

        let mut https = Map::new();
        if let Some(cert) = &self.https_cert {
            https.insert("cert".into(), serde_json::to_value(cert)?);
        }
        if let Some(key) = &self.https_key {
            https.insert("key".into(), serde_json::to_value(key)?);
        }
        if let Some(passphrase) = &self.https_passphrase {
            https.insert("passphrase".into(), Value::String(passphrase.clone()));
        }
        if let Some(pfx) = &self.https_pfx {
            https.insert("pfx".into(), serde_json::to_value(pfx)?);
        }
        if !https.is_empty() {
            overlay.insert("https".into(), Value::Object(https));
        }

        if let Some(level) = self.log_level {
            overlay.insert("logLevel".into(), Value::String(level.as_str().to_string()));
        }
        if self.log_time {
            overlay.insert("logTime".into(), Value::Bool(true));
        }

        let mut open = Map::new();
        if let Some(app) = self.open_app.as_deref().and_then(parse) {
            open.insert("app".into(), app);
        }
        if let Some(path) = self.open_path.as_deref().filter(|p| !p.trim().is_empty()) {
            open.insert("path".into(), Value::String(path.to_string()));
        }
        if !open.is_empty() {
            overlay.insert("open".into(), Value::Object(open));
        } else if self.open {
            overlay.insert("open".into(), Value::Bool(true));
        }

        if let Some(clipboard) = self.clipboard {
            overlay.insert("clipboard".into(), Value::Bool(clipboard));
        }
        if self.warnings_as_errors {
            overlay.insert("warningsAsErrors".into(), Value::Bool(true));
        }

        Ok(Value::Object(overlay))
    }
}

/// Parse a flag that must hold a JSON object. Empty input means "not given".
fn object_flag(field: &str, raw: &str) -> Result<Option<Value>, ConfigError> {
    match parse(raw) {
        None => Ok(None),
        Some(value @ Value::Object(_)) => Ok(Some(value)),
        Some(other) => Err(ConfigError::ExpectedObject {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}
