use serde_json::{json, Value};
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "localhost";

pub const DEFAULT_PORT: u16 = 8080;

/// Built-in serve options, the lowest-precedence layer of the merge.
pub fn default_serve() -> Value {
    json!({
        "host": DEFAULT_HOST,
        "port": DEFAULT_PORT,
        "http2": false,
        "content": [],
        "dev": {},
        "hot": {},
        "logLevel": "info",
        "logTime": false,
        "open": false,
        "clipboard": true,
        "warningsAsErrors": false,
    })
}

pub fn default_out_dir() -> PathBuf {
    PathBuf::from("dist")
}

/// Patterns the watcher skips unless a target overrides them.
pub fn default_watch_ignore() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        ".git".to_string(),
        "dist".to_string(),
        "build".to_string(),
        "*.log".to_string(),
        ".DS_Store".to_string(),
    ]
}

pub fn default_debounce_ms() -> u64 {
    100
}
