//! Side effects the server triggers once it is listening.
//!
//! Both are traits so embedders and tests can substitute them.

use anyhow::Context;
use std::process::{Command, Stdio};

/// Opens a URL in a browser.
pub trait BrowserOpener: Send + Sync {
    /// Open `url`, in `app` when given (program name followed by arguments).
    fn open(&self, url: &str, app: &[String]) -> anyhow::Result<()>;
}

/// Writes text to the system clipboard.
pub trait ClipboardWriter: Send + Sync {
    fn write(&self, text: &str) -> anyhow::Result<()>;
}

/// Uses the platform launcher:
/// - macOS: `open` (`open -a <app>` with an app)
/// - Windows: `start`
/// - Linux: `xdg-open`, or the app itself
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str, app: &[String]) -> anyhow::Result<()> {
        let mut command = match app.split_first() {
            None => default_launcher(url),
            Some((program, args)) => {
                if cfg!(target_os = "macos") {
                    let mut command = Command::new("open");
                    command.arg("-a").arg(program).arg(url);
                    if !args.is_empty() {
                        command.arg("--args").args(args);
                    }
                    command
                } else if cfg!(target_os = "windows") {
                    let mut command = Command::new("cmd");
                    command.args(["/C", "start", ""]).arg(program).arg(url).args(args);
                    command
                } else {
                    let mut command = Command::new(program);
                    command.args(args).arg(url);
                    command
                }
            }
        };

        command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to open browser at {}", url))?;
        Ok(())
    }
}

fn default_launcher(url: &str) -> Command {
    if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(url);
        command
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", url]);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(url);
        command
    }
}

/// Writes through the platform clipboard (`cli-clipboard`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClipboard;

impl ClipboardWriter for SystemClipboard {
    fn write(&self, text: &str) -> anyhow::Result<()> {
        cli_clipboard::set_contents(text.to_owned())
            .map_err(|e| anyhow::anyhow!("Failed to write clipboard: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_app_missing_errors() {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            return;
        }
        let err = SystemBrowser
            .open("http://localhost:8080", &["devserve-no-such-browser".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("http://localhost:8080"));
    }
}
