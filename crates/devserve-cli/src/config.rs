//! Configuration file discovery and loading.
//!
//! Sources, lowest priority first:
//! 1. the bundle configuration defaults
//! 2. `devserve.config.json` / `devserve.config.toml` (or the given file)
//! 3. `DEVSERVE_COMMAND`, `DEVSERVE_CWD`, `DEVSERVE_NAME`
//!
//! A JSON file holding an array describes several targets; env overrides do
//! not apply to those.

use crate::error::{CliError, Result};
use devserve::{BundleConfig, ConfigSource};
use figment::{
    providers::{Env, Format as _, Json, Serialized, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

/// File names looked up in the working directory, in order.
pub const CONFIG_FILES: [&str; 2] = ["devserve.config.json", "devserve.config.toml"];

const ENV_KEYS: [&str; 3] = ["command", "cwd", "name"];

/// Find the configuration file: `explicit` if given, else the first of
/// [`CONFIG_FILES`] present in `cwd`.
pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(CliError::ConfigFile {
                path: path.to_path_buf(),
                message: "file not found".to_string(),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }

    Ok(CONFIG_FILES
        .iter()
        .map(|name| cwd.join(name))
        .find(|path| path.is_file()))
}

/// Load the bundle configuration(s) as a config source.
pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<ConfigSource> {
    let Some(path) = discover(explicit, cwd)? else {
        tracing::debug!("no configuration file, serving defaults");
        return extract(Figment::new().merge(Serialized::defaults(BundleConfig::default())), None)
            .map(ConfigSource::Raw);
    };
    tracing::debug!(path = %path.display(), "loading configuration");

    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

    if is_toml(&path) {
        let figment = Figment::new()
            .merge(Serialized::defaults(BundleConfig::default()))
            .merge(Toml::file(&path));
        let config = anchor(extract(figment, Some(&path))?, &base);
        return Ok(ConfigSource::Raw(config));
    }

    let text = std::fs::read_to_string(&path).map_err(|e| CliError::ConfigFile {
        path: path.clone(),
        message: e.to_string(),
    })?;

    if text.trim_start().starts_with('[') {
        let configs: Vec<BundleConfig> =
            serde_json::from_str(&text).map_err(|e| CliError::ConfigFile {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let configs = configs.into_iter().map(|c| anchor(c, &base)).collect();
        return Ok(ConfigSource::Sequence(configs));
    }

    let figment = Figment::new()
        .merge(Serialized::defaults(BundleConfig::default()))
        .merge(Json::string(&text));
    let config = anchor(extract(figment, Some(&path))?, &base);
    Ok(ConfigSource::Raw(config))
}

fn extract(figment: Figment, path: Option<&Path>) -> Result<BundleConfig> {
    figment
        .merge(Env::prefixed("DEVSERVE_").only(&ENV_KEYS))
        .extract()
        .map_err(|e| CliError::ConfigFile {
            path: path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("environment")),
            message: e.to_string(),
        })
}

/// Make `cwd` relative to the configuration file's directory.
fn anchor(mut config: BundleConfig, base: &Path) -> BundleConfig {
    if base.as_os_str().is_empty() {
        return config;
    }
    config.cwd = Some(match config.cwd.take() {
        Some(cwd) if cwd.is_absolute() => cwd,
        Some(cwd) => base.join(cwd),
        None => base.to_path_buf(),
    });
    config
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("toml")
}
