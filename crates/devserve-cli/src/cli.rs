//! Command-line interface definition.

use clap::Parser;
use devserve::{Flags, LogLevel};
use std::path::PathBuf;

/// devserve - a development server for bundler output
#[derive(Parser, Debug)]
#[command(
    name = "devserve",
    version,
    about = "A development server for bundler output",
    long_about = "Runs a build command, serves its output from memory and notifies\n\
                  browsers over a WebSocket whenever a rebuild starts or finishes."
)]
pub struct Cli {
    /// Configuration file (JSON or TOML)
    #[arg(value_name = "CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Configuration file; same as the positional argument
    #[arg(long, value_name = "PATH", conflicts_with = "config_file")]
    pub config: Option<PathBuf>,

    /// Directory of static files to serve (repeatable)
    #[arg(long, value_name = "DIR")]
    pub content: Vec<PathBuf>,

    /// Options for the bundle middleware, as a JSON object
    #[arg(long, value_name = "JSON")]
    pub dev: Option<String>,

    /// Options for the hot client, as a JSON object
    #[arg(long, value_name = "JSON")]
    pub hot: Option<String>,

    /// Do not start the hot client
    #[arg(long)]
    pub no_hot_client: bool,

    /// Host to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Serve HTTP/2
    #[arg(long)]
    pub http2: bool,

    /// TLS certificate (PEM)
    #[arg(long, value_name = "FILE")]
    pub https_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, value_name = "FILE")]
    pub https_key: Option<PathBuf>,

    /// Passphrase for the TLS key
    #[arg(long = "https-pass", value_name = "PASSPHRASE")]
    pub https_pass: Option<String>,

    /// TLS PFX bundle
    #[arg(long, value_name = "FILE")]
    pub https_pfx: Option<PathBuf>,

    /// trace, debug, info, warn, error or silent
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Prefix log lines with the time
    #[arg(long)]
    pub log_time: bool,

    /// Open the browser once listening
    #[arg(long)]
    pub open: bool,

    /// Browser to open, as a JSON string or array (program and arguments)
    #[arg(long, value_name = "JSON")]
    pub open_app: Option<String>,

    /// Path to open, relative to the server URL
    #[arg(long, value_name = "PATH")]
    pub open_path: Option<String>,

    /// Env file to load before starting (repeatable)
    #[arg(long, value_name = "ENVFILE")]
    pub require: Vec<PathBuf>,

    /// Do not copy the server URL to the clipboard
    #[arg(long)]
    pub no_clipboard: bool,

    /// Treat compiler warnings like errors
    #[arg(long)]
    pub warnings_as_errors: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Configuration file given on the command line, either way.
    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_file.as_ref().or(self.config.as_ref())
    }

    /// Flags for option resolution. Only what was given is set.
    pub fn to_flags(&self) -> Flags {
        Flags {
            content: self.content.clone(),
            dev: self.dev.clone(),
            hot: self.hot.clone(),
            no_hot_client: self.no_hot_client,
            host: self.host.clone(),
            port: self.port,
            http2: self.http2,
            https_cert: self.https_cert.clone(),
            https_key: self.https_key.clone(),
            https_passphrase: self.https_pass.clone(),
            https_pfx: self.https_pfx.clone(),
            log_level: self.log_level,
            log_time: self.log_time,
            open: self.open,
            open_app: self.open_app.clone(),
            open_path: self.open_path.clone(),
            require: self.require.clone(),
            clipboard: self.no_clipboard.then_some(false),
            warnings_as_errors: self.warnings_as_errors,
            ..Flags::default()
        }
    }
}
