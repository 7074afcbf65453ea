//! The compiler capability and its adapter onto the event bus.
//!
//! A [`Compiler`] only has to know how to run one build cycle. Lifecycle
//! notifications go through [`Hooks`], which the adapter in [`attach`]
//! taps to forward `build-started`, `build-finished`, `compiler-warning`
//! and `compiler-error` onto the bus.

mod adapter;
mod command;
mod multi;
mod state;
mod stats;
mod watcher;

pub use adapter::{attach, CompilerBinding};
pub use command::CommandCompiler;
pub use multi::MultiCompiler;
pub use state::{content_type_from_extension, BuildState, BuildStatus, BundleCache, CachedFile};
pub use stats::{BlockingPolicy, Stats, StatsSummary};
pub use watcher::{FileChange, FileWatcher, PendingWatch, Watching};

use crate::error::ConfigError;
use crate::options::BundleConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Identifies a tapped hook so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapId(u64);

type BeforeRunTap = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;
type AfterCompileTap = Arc<dyn Fn(&Arc<Stats>) -> anyhow::Result<()> + Send + Sync>;

/// Build lifecycle hooks of one compiler.
///
/// Taps run in the order they were added. Tapping or untapping from inside
/// a tap is allowed and takes effect on the next call.
#[derive(Default)]
pub struct Hooks {
    next_id: AtomicU64,
    before_run: Mutex<Vec<(TapId, BeforeRunTap)>>,
    after_compile: Mutex<Vec<(TapId, AfterCompileTap)>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_run", &self.before_run.lock().len())
            .field("after_compile", &self.after_compile.lock().len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> TapId {
        TapId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_before_run<F>(&self, tap: F) -> TapId
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.before_run.lock().push((id, Arc::new(tap)));
        id
    }

    pub fn on_after_compile<F>(&self, tap: F) -> TapId
    where
        F: Fn(&Arc<Stats>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.after_compile.lock().push((id, Arc::new(tap)));
        id
    }

    /// Remove a tap. Returns `false` if it was not registered.
    pub fn untap(&self, id: TapId) -> bool {
        let mut removed = false;
        self.before_run.lock().retain(|(tap, _)| {
            let keep = *tap != id;
            removed |= !keep;
            keep
        });
        self.after_compile.lock().retain(|(tap, _)| {
            let keep = *tap != id;
            removed |= !keep;
            keep
        });
        removed
    }

    pub fn tap_count(&self) -> usize {
        self.before_run.lock().len() + self.after_compile.lock().len()
    }

    pub fn call_before_run(&self) -> anyhow::Result<()> {
        let taps: Vec<BeforeRunTap> = self
            .before_run
            .lock()
            .iter()
            .map(|(_, tap)| Arc::clone(tap))
            .collect();
        for tap in taps {
            tap()?;
        }
        Ok(())
    }

    pub fn call_after_compile(&self, stats: &Arc<Stats>) -> anyhow::Result<()> {
        let taps: Vec<AfterCompileTap> = self
            .after_compile
            .lock()
            .iter()
            .map(|(_, tap)| Arc::clone(tap))
            .collect();
        for tap in taps {
            tap(stats)?;
        }
        Ok(())
    }
}

/// A bundler the server can drive.
#[async_trait]
pub trait Compiler: Send + Sync + 'static {
    /// Display name used in logs and stats
    fn name(&self) -> &str;

    fn hooks(&self) -> &Hooks;

    /// Status and in-memory output of the last build
    fn state(&self) -> &BuildState;

    /// Perform one build cycle and report what happened.
    ///
    /// Compilation problems belong in the returned [`Stats`], not in a
    /// panic or a dropped result.
    async fn build(&self) -> Stats;

    /// Directories whose changes should trigger a rebuild
    fn watch_roots(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn ignore_patterns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Directories the build writes to; changes under them never trigger a
    /// rebuild
    fn output_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn debounce_ms(&self) -> u64 {
        crate::options::defaults::default_debounce_ms()
    }

    fn assets(&self) -> Arc<BundleCache> {
        self.state().cache()
    }

    /// Run a full cycle: before-run hooks, build, after-compile hooks.
    ///
    /// # Errors
    ///
    /// Returns the first hook error. A failed compilation is not an error.
    async fn run(&self) -> anyhow::Result<Arc<Stats>> {
        self.hooks().call_before_run()?;
        self.state().start_build();

        let started = Instant::now();
        let mut stats = self.build().await;
        if stats.duration_ms == 0 {
            stats.duration_ms = started.elapsed().as_millis() as u64;
        }

        self.state().settle(&stats.summary(), stats.duration_ms);

        let stats = Arc::new(stats);
        self.hooks().call_after_compile(&stats)?;
        Ok(stats)
    }
}

/// Build the compiler for a set of targets: one target compiles directly,
/// several are wrapped in a [`MultiCompiler`].
///
/// # Errors
///
/// Returns `ConfigError::MissingField` when there are no targets.
pub fn from_targets(targets: &[BundleConfig]) -> Result<Arc<dyn Compiler>, ConfigError> {
    match targets {
        [] => Err(ConfigError::MissingField {
            field: "command".to_string(),
            hint: "Provide at least one build target".to_string(),
        }),
        [single] => Ok(Arc::new(CommandCompiler::new(single.clone()))),
        many => {
            let children = many
                .iter()
                .map(|target| Arc::new(CommandCompiler::new(target.clone())) as Arc<dyn Compiler>)
                .collect();
            Ok(Arc::new(MultiCompiler::new(children)))
        }
    }
}
