use super::state::{BuildState, BundleCache};
use super::{Compiler, Hooks, Stats};
use async_trait::async_trait;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Several compilers built together as one logical build.
///
/// Children run concurrently, each through its own hooks. The aggregate
/// stats carry one child entry per target, and the served output is the
/// union of the children's files with earlier targets winning on conflicts.
pub struct MultiCompiler {
    children: Vec<Arc<dyn Compiler>>,
    hooks: Hooks,
    state: BuildState,
}

impl MultiCompiler {
    pub fn new(children: Vec<Arc<dyn Compiler>>) -> Self {
        Self {
            children,
            hooks: Hooks::new(),
            state: BuildState::new(),
        }
    }

    pub fn children(&self) -> &[Arc<dyn Compiler>] {
        &self.children
    }
}

#[async_trait]
impl Compiler for MultiCompiler {
    fn name(&self) -> &str {
        "multi"
    }

    fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    fn state(&self) -> &BuildState {
        &self.state
    }

    async fn build(&self) -> Stats {
        let started = Instant::now();
        let mut stats = Stats::new("multi");

        let results = join_all(self.children.iter().map(|child| child.run())).await;

        let mut cache = BundleCache::new();
        for (child, result) in self.children.iter().zip(results) {
            match result {
                Ok(child_stats) => stats.children.push((*child_stats).clone()),
                Err(e) => {
                    let mut failed = Stats::new(child.name());
                    failed.errors.push(e.to_string());
                    stats.children.push(failed);
                }
            }
            cache.merge_missing(&child.assets());
        }

        stats.assets = cache.paths();
        self.state.update_cache(cache);
        stats.duration_ms = started.elapsed().as_millis() as u64;
        stats
    }

    fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        for root in self.children.iter().flat_map(|child| child.watch_roots()) {
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        roots
    }

    fn ignore_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = Vec::new();
        for pattern in self.children.iter().flat_map(|child| child.ignore_patterns()) {
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        patterns
    }

    fn output_paths(&self) -> Vec<PathBuf> {
        self.children
            .iter()
            .flat_map(|child| child.output_paths())
            .collect()
    }

    fn debounce_ms(&self) -> u64 {
        self.children
            .iter()
            .map(|child| child.debounce_ms())
            .max()
            .unwrap_or_else(crate::options::defaults::default_debounce_ms)
    }
}
