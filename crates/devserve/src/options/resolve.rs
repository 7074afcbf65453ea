use crate::bus::Subscriptions;
use crate::compiler::Compiler;
use crate::error::ConfigError;
use crate::logger::LogLevel;
use crate::options::defaults::default_serve;
use crate::options::source::{BundleConfig, ConfigSource};
use crate::options::{Flags, HotOption, OpenOption, Options, TlsOptions};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Parse a string flag as JSON.
///
/// Returns `None` for empty input and the original string when it is not
/// valid JSON.
pub fn parse(input: &str) -> Option<Value> {
    if input.trim().is_empty() {
        return None;
    }

    Some(serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string())))
}

/// Resolve a configuration source and flags into canonical [`Options`].
///
/// Factories are awaited first, so a deferred configuration goes through
/// exactly the same path as a literal one.
///
/// # Errors
///
/// Fails with [`ConfigError`] on malformed or contradictory input. Nothing
/// is bound or spawned here.
pub async fn resolve(source: ConfigSource, flags: Flags) -> Result<Options, ConfigError> {
    let (targets, compiler) = flatten(source).await?;

    if targets.is_empty() && compiler.is_none() {
        return Err(ConfigError::MissingField {
            field: "command".to_string(),
            hint: "Provide at least one build target or an existing compiler".to_string(),
        });
    }

    let mut merged = default_serve();

    if let Some(section) = targets.first().and_then(|target| target.serve.clone()) {
        if !section.is_object() {
            return Err(ConfigError::InvalidValue {
                field: "serve".to_string(),
                value: section.to_string(),
                hint: "The serve section must be an object".to_string(),
            });
        }
        merge(&mut merged, section);
    }

    merge(&mut merged, flags.to_overlay()?);

    let mut on = match merged.as_object_mut().and_then(|map| map.remove("on")) {
        Some(value) => Subscriptions::from_value(&value)?,
        None => Subscriptions::new(),
    };
    on.extend(flags.on.clone());

    let section: ServeSection = serde_json::from_value(merged)?;
    let host = section.host;
    let port = normalize_port(&section.port)?;

    if section.http2 && !crate::server::supports_http2() {
        return Err(ConfigError::Http2Unsupported);
    }

    let https = match section.https {
        Some(tls) if !tls.is_empty() => Some(validate_tls(tls)?),
        _ => None,
    };

    let hot = normalize_hot(section.hot)?;
    if let HotOption::Enabled(map) = &hot {
        validate_hot_host(&host, map)?;
    }

    Ok(Options {
        host,
        port,
        http2: section.http2,
        https,
        content: section.content.map(ContentPaths::into_vec).unwrap_or_default(),
        dev: section.dev,
        hot,
        log_level: section.log_level,
        log_time: section.log_time,
        open: normalize_open(section.open)?,
        clipboard: section.clipboard,
        warnings_as_errors: section.warnings_as_errors,
        add: flags.add.clone(),
        compiler,
        on,
        targets,
    })
}

type Flattened = (Vec<BundleConfig>, Option<Arc<dyn Compiler>>);

fn flatten(source: ConfigSource) -> BoxFuture<'static, Result<Flattened, ConfigError>> {
    Box::pin(async move {
        match source {
            ConfigSource::Raw(config) => Ok((vec![config], None)),
            ConfigSource::Sequence(configs) => Ok((configs, None)),
            ConfigSource::Factory(factory) => flatten(factory().await?).await,
            ConfigSource::PrebuiltCompiler(compiler) => Ok((Vec::new(), Some(compiler))),
        }
    })
}

/// Deep-merge `overlay` into `base`. Objects merge per key, anything else
/// replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let nested = value.is_object() && base.get(&key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = base.get_mut(&key) {
                        merge(existing, value);
                    }
                } else {
                    base.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentPaths {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl ContentPaths {
    fn into_vec(self) -> Vec<PathBuf> {
        match self {
            ContentPaths::One(path) => vec![path],
            ContentPaths::Many(paths) => paths,
        }
    }
}

/// The merged serve section before normalisation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ServeSection {
    host: String,
    port: Value,
    #[serde(default)]
    http2: bool,
    #[serde(default)]
    https: Option<TlsOptions>,
    #[serde(default)]
    content: Option<ContentPaths>,
    #[serde(default)]
    dev: Map<String, Value>,
    #[serde(default)]
    hot: Value,
    #[serde(default)]
    log_level: LogLevel,
    #[serde(default)]
    log_time: bool,
    #[serde(default)]
    open: Value,
    #[serde(default = "enabled")]
    clipboard: bool,
    #[serde(default)]
    warnings_as_errors: bool,
}

fn enabled() -> bool {
    true
}

fn normalize_port(value: &Value) -> Result<u16, ConfigError> {
    let port = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };

    port.ok_or_else(|| ConfigError::InvalidValue {
        field: "port".to_string(),
        value: value.to_string(),
        hint: "Port must be a number between 0 and 65535".to_string(),
    })
}

fn normalize_hot(value: Value) -> Result<HotOption, ConfigError> {
    match value {
        Value::Bool(false) => Ok(HotOption::Disabled),
        Value::Bool(true) | Value::Null => Ok(HotOption::Enabled(Map::new())),
        Value::Object(map) => Ok(HotOption::Enabled(map)),
        other => Err(ConfigError::ExpectedObject {
            field: "hot".to_string(),
            value: other.to_string(),
        }),
    }
}

fn normalize_open(value: Value) -> Result<OpenOption, ConfigError> {
    match value {
        Value::Bool(false) | Value::Null => Ok(OpenOption::Disabled),
        Value::Bool(true) => Ok(OpenOption::Enabled {
            app: Vec::new(),
            path: None,
        }),
        Value::Object(map) => {
            let app = match map.get("app") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::String(app)) => vec![app.clone()],
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s.clone()),
                        other => Err(invalid_open(other)),
                    })
                    .collect::<Result<_, _>>()?,
                Some(other) => return Err(invalid_open(other)),
            };
            let path = match map.get("path") {
                None | Some(Value::Null) => None,
                Some(Value::String(path)) => Some(path.clone()),
                Some(other) => return Err(invalid_open(other)),
            };
            Ok(OpenOption::Enabled { app, path })
        }
        other => Err(invalid_open(&other)),
    }
}

fn invalid_open(value: &Value) -> ConfigError {
    ConfigError::InvalidValue {
        field: "open".to_string(),
        value: value.to_string(),
        hint: "Use true, or an object with `app` (string or list) and `path`".to_string(),
    }
}

/// A PKCS#12 bundle stands on its own; otherwise cert and key come as a pair.
fn validate_tls(tls: TlsOptions) -> Result<TlsOptions, ConfigError> {
    if tls.pfx.is_some() {
        return Ok(tls);
    }
    match (&tls.cert, &tls.key) {
        (Some(_), Some(_)) => Ok(tls),
        (None, _) => Err(ConfigError::MissingField {
            field: "https.cert".to_string(),
            hint: "HTTPS needs both a certificate and a private key".to_string(),
        }),
        (_, None) => Err(ConfigError::MissingField {
            field: "https.key".to_string(),
            hint: "HTTPS needs both a certificate and a private key".to_string(),
        }),
    }
}

/// The hot client must live on the same host as the server.
fn validate_hot_host(host: &str, hot: &Map<String, Value>) -> Result<(), ConfigError> {
    let requested = match hot.get("host") {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::String(h)) => h.clone(),
        Some(Value::Object(sides)) => match sides.get("server") {
            Some(Value::String(server)) => server.clone(),
            None | Some(Value::Null) => return Ok(()),
            Some(other) => return Err(invalid_hot_host(other)),
        },
        Some(other) => return Err(invalid_hot_host(other)),
    };

    if requested != host {
        return Err(ConfigError::HostMismatch {
            host: host.to_string(),
            hot: requested,
        });
    }

    Ok(())
}

fn invalid_hot_host(value: &Value) -> ConfigError {
    ConfigError::InvalidValue {
        field: "hot.host".to_string(),
        value: value.to_string(),
        hint: "Use a host name or an object with `server` and `client`".to_string(),
    }
}
