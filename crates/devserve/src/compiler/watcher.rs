//! File system watching and the rebuild loop it drives.

use super::Compiler;
use crate::error::ServerError;
use crate::logger::Logger;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// File change event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Modified(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
}

impl FileChange {
    /// Get the path affected by this change.
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Modified(p) | FileChange::Created(p) | FileChange::Removed(p) => p,
        }
    }
}

/// Recursive watcher over a set of roots, with ignore patterns, ignored
/// output directories and per-path debouncing.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl FileWatcher {
    /// Watch `roots` recursively, dropping changes under `outputs`.
    ///
    /// Roots that do not exist are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Watch` if the platform watcher cannot be created.
    pub fn new(
        roots: Vec<PathBuf>,
        ignore_patterns: Vec<String>,
        outputs: Vec<PathBuf>,
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<FileChange>), ServerError> {
        let (tx, rx) = mpsc::channel(100);

        let roots: Vec<PathBuf> = roots
            .into_iter()
            .filter(|root| {
                let exists = root.exists();
                if !exists {
                    tracing::warn!("Not watching {}: path does not exist", root.display());
                }
                exists
            })
            .map(|root| canonical(&root))
            .collect();
        let outputs: Vec<PathBuf> = outputs.iter().map(|path| canonical(path)).collect();

        let debounce = Duration::from_millis(debounce_ms);
        let mut last_event: Option<(PathBuf, Instant)> = None;
        let watched = roots.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };

            for path in &event.paths {
                if outputs.iter().any(|output| path.starts_with(output))
                    || Self::should_ignore(path, &watched, &ignore_patterns)
                {
                    continue;
                }

                let now = Instant::now();
                if let Some((last_path, last_time)) = &last_event {
                    if last_path == path && now.duration_since(*last_time) < debounce {
                        continue;
                    }
                }
                last_event = Some((path.clone(), now));

                let change = match event.kind {
                    notify::EventKind::Create(_) => FileChange::Created(path.clone()),
                    notify::EventKind::Modify(_) => FileChange::Modified(path.clone()),
                    notify::EventKind::Remove(_) => FileChange::Removed(path.clone()),
                    _ => continue,
                };

                let _ = tx.blocking_send(change);
            }
        })?;

        for root in &roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
        }

        Ok((
            Self {
                _watcher: watcher,
                roots,
            },
            rx,
        ))
    }

    /// Whether a change under one of `roots` should be dropped.
    fn should_ignore(path: &Path, roots: &[PathBuf], ignore_patterns: &[String]) -> bool {
        let Some(rel_path) = roots.iter().find_map(|root| path.strip_prefix(root).ok()) else {
            return true;
        };

        let path_str = rel_path.to_string_lossy();

        for pattern in ignore_patterns {
            if let Some(ext) = pattern.strip_prefix('*') {
                if path_str.ends_with(ext) {
                    return true;
                }
            } else if contains_components(rel_path, pattern) {
                return true;
            }
        }

        rel_path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Whether `pattern`'s components appear as a run inside `path`.
fn contains_components(path: &Path, pattern: &str) -> bool {
    let pattern: Vec<Component<'_>> = Path::new(pattern).components().collect();
    if pattern.is_empty() {
        return false;
    }
    let parts: Vec<Component<'_>> = path.components().collect();
    parts.windows(pattern.len()).any(|run| run == pattern.as_slice())
}

/// Canonical form of `path`, resolving the longest existing ancestor when
/// the path itself is not there yet.
fn canonical(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(path) => path,
        Err(_) => match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => canonical(parent).join(name),
            _ => path.to_path_buf(),
        },
    }
}

/// File watcher set up for a compiler, with no build run yet.
pub struct PendingWatch {
    compiler: Arc<dyn Compiler>,
    logger: Logger,
    watcher: Option<(FileWatcher, mpsc::Receiver<FileChange>)>,
}

impl PendingWatch {
    /// Create the file watcher. Changes are queued from here on.
    ///
    /// # Errors
    ///
    /// Fails if the file watcher cannot be created.
    pub fn new(compiler: Arc<dyn Compiler>, logger: Logger) -> Result<Self, ServerError> {
        let roots = compiler.watch_roots();
        let watcher = if roots.is_empty() {
            None
        } else {
            Some(FileWatcher::new(
                roots,
                compiler.ignore_patterns(),
                compiler.output_paths(),
                compiler.debounce_ms(),
            )?)
        };

        Ok(Self {
            compiler,
            logger,
            watcher,
        })
    }

    /// Run the first build and the rebuild loop on the current runtime.
    pub fn start(self) -> Watching {
        let PendingWatch {
            compiler,
            logger,
            watcher,
        } = self;
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            if let Err(e) = compiler.run().await {
                logger.error(format!("Build hook failed: {}", e));
            }

            let Some((watcher, mut changes)) = watcher else {
                return;
            };
            tracing::debug!(roots = watcher.roots().len(), "watching for changes");

            loop {
                tokio::select! {
                    change = changes.recv() => {
                        let Some(change) = change else {
                            break;
                        };
                        let mut batch = vec![change];
                        while let Ok(more) = changes.try_recv() {
                            batch.push(more);
                        }
                        logger.debug(format!(
                            "{} changed, rebuilding",
                            batch[0].path().display()
                        ));

                        if let Err(e) = compiler.run().await {
                            logger.error(format!("Build hook failed: {}", e));
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        Watching {
            stop,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Runs a compiler once, then again after every batch of file changes.
pub struct Watching {
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watching {
    /// Set up the watcher and start the loop on the current runtime.
    ///
    /// # Errors
    ///
    /// Fails if the file watcher cannot be created.
    pub fn start(compiler: Arc<dyn Compiler>, logger: Logger) -> Result<Self, ServerError> {
        Ok(PendingWatch::new(compiler, logger)?.start())
    }

    /// Stop watching and cancel a build in progress.
    pub async fn close(&self) {
        self.stop.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}
