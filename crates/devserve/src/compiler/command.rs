//! Compiler that shells out to a build command and serves its output.

use super::state::{content_type_from_extension, BuildState, BundleCache};
use super::{Compiler, Hooks, Stats};
use crate::options::BundleConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::fs;
use tokio::process::Command;

/// Files larger than this are not loaded into memory.
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Runs `command` in a shell, then loads `out_dir` into memory.
///
/// Exit status and output decide what ends up in the stats:
/// - a non-zero exit makes the cycle fail, with the lines mentioning
///   `error` (or the whole stderr) as error entries
/// - lines mentioning `warning` become warning entries either way
///
/// Without a command the output directory is served as-is.
pub struct CommandCompiler {
    name: String,
    config: BundleConfig,
    cwd: PathBuf,
    hooks: Hooks,
    state: BuildState,
}

impl CommandCompiler {
    pub fn new(config: BundleConfig) -> Self {
        let cwd = match &config.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let name = config.name.clone().unwrap_or_else(|| "bundle".to_string());

        Self {
            name,
            config,
            cwd,
            hooks: Hooks::new(),
            state: BuildState::new(),
        }
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Absolute output directory.
    pub fn out_dir(&self) -> PathBuf {
        self.resolve(&self.config.out_dir)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    fn shell(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }

    async fn run_command(&self, command: &str, stats: &mut Stats) {
        tracing::debug!(command, cwd = %self.cwd.display(), "running build command");

        let output = Self::shell(command)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                stats.errors.push(format!("Failed to run `{}`: {}", command, e));
                return;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines = || {
            stderr
                .lines()
                .chain(stdout.lines())
                .map(str::trim)
                .filter(|line| !line.is_empty())
        };

        stats.warnings.extend(
            lines()
                .filter(|line| line.to_ascii_lowercase().contains("warning"))
                .map(str::to_string),
        );

        if output.status.success() {
            return;
        }

        stats.errors.extend(
            lines()
                .filter(|line| line.to_ascii_lowercase().contains("error"))
                .map(str::to_string),
        );

        if stats.errors.is_empty() {
            let detail = stderr.trim();
            stats.errors.push(if detail.is_empty() {
                format!("`{}` exited with {}", command, output.status)
            } else {
                detail.to_string()
            });
        }
    }

    /// Read the output directory into a cache.
    ///
    /// Paths outside `out_dir` (through symlinks) and oversized files are
    /// skipped.
    pub async fn load_output(&self) -> std::io::Result<BundleCache> {
        let out_dir = self.out_dir();
        let mut cache = BundleCache::new();
        let mut pending = vec![out_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = entry.metadata().await?;

                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !metadata.is_file() || !path.starts_with(&out_dir) {
                    continue;
                }

                if metadata.len() > MAX_FILE_SIZE {
                    tracing::warn!(
                        "Skipping large file {}: {} bytes",
                        path.display(),
                        metadata.len()
                    );
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&out_dir) else {
                    continue;
                };
                let url_path = format!(
                    "/{}",
                    relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/")
                );

                let content = fs::read(&path).await?;
                let content_type = content_type_from_extension(&url_path).to_string();
                cache.insert(url_path, content, content_type);
            }
        }

        Ok(cache)
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    fn state(&self) -> &BuildState {
        &self.state
    }

    async fn build(&self) -> Stats {
        let started = Instant::now();
        let mut stats = Stats::new(self.name.clone());

        if let Some(command) = self.config.command.as_deref() {
            self.run_command(command, &mut stats).await;
        }

        // A failed cycle keeps serving the previous output.
        if !stats.has_errors() {
            match self.load_output().await {
                Ok(cache) => {
                    stats.assets = cache.paths();
                    self.state.update_cache(cache);
                }
                Err(e) => stats.errors.push(format!(
                    "Failed to read output directory {}: {}",
                    self.out_dir().display(),
                    e
                )),
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        stats
    }

    fn watch_roots(&self) -> Vec<PathBuf> {
        self.config
            .watch
            .iter()
            .map(|path| self.resolve(path))
            .collect()
    }

    fn ignore_patterns(&self) -> Vec<String> {
        self.config.ignore.clone()
    }

    fn output_paths(&self) -> Vec<PathBuf> {
        vec![self.out_dir()]
    }

    fn debounce_ms(&self) -> u64 {
        self.config.debounce_ms
    }
}
