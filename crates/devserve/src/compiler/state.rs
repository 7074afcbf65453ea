//! Build output and status shared between a compiler and the middleware
//! serving its files.

use super::stats::{BlockingPolicy, StatsSummary};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Build status tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    /// No build has been performed yet
    NotStarted,
    /// Build is currently in progress
    InProgress { started_at: Instant },
    /// Build completed, possibly with warnings
    Success { duration_ms: u64 },
    /// Build failed with error
    Failed { error: String },
}

impl BuildStatus {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, BuildStatus::InProgress { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success { .. })
    }

    /// A finished build, successful or not.
    pub fn is_settled(&self) -> bool {
        matches!(self, BuildStatus::Success { .. } | BuildStatus::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BuildStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// One file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub content: Vec<u8>,
    pub content_type: String,
}

/// In-memory bundle output, keyed by URL path (e.g. `/app.js`).
#[derive(Debug, Clone, Default)]
pub struct BundleCache {
    files: HashMap<String, CachedFile>,
}

impl BundleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: String, content: Vec<u8>, content_type: String) {
        self.files.insert(
            path,
            CachedFile {
                content,
                content_type,
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<&CachedFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sorted URL paths of every cached file.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Copy in files from `other` whose paths are not taken yet.
    pub fn merge_missing(&mut self, other: &BundleCache) {
        for (path, file) in &other.files {
            self.files
                .entry(path.clone())
                .or_insert_with(|| file.clone());
        }
    }
}

/// Determine MIME type from file extension.
pub fn content_type_from_extension(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    match extension {
        "js" | "mjs" | "cjs" => "application/javascript",
        "map" | "json" => "application/json",
        "css" => "text/css",
        "html" | "htm" => "text/html",
        "wasm" => "application/wasm",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" | "ts" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Status and output of a compiler.
///
/// The status lives in a watch channel so readers can wait for the first
/// build to settle; the cache is swapped wholesale after every build.
/// `policy` decides which summaries settle as failed.
#[derive(Debug)]
pub struct BuildState {
    status: watch::Sender<BuildStatus>,
    cache: RwLock<Arc<BundleCache>>,
    policy: RwLock<BlockingPolicy>,
}

impl Default for BuildState {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildState {
    pub fn new() -> Self {
        let (status, _) = watch::channel(BuildStatus::NotStarted);
        Self {
            status,
            cache: RwLock::new(Arc::new(BundleCache::new())),
            policy: RwLock::new(BlockingPolicy::default()),
        }
    }

    pub fn blocking_policy(&self) -> BlockingPolicy {
        *self.policy.read()
    }

    pub fn set_blocking_policy(&self, policy: BlockingPolicy) {
        *self.policy.write() = policy;
    }

    /// Settle the current build from its summary.
    pub fn settle(&self, summary: &StatsSummary, duration_ms: u64) {
        if self.blocking_policy().is_blocking(summary) {
            let problems: Vec<&str> = summary
                .errors
                .iter()
                .chain(&summary.warnings)
                .map(String::as_str)
                .collect();
            self.fail_build(problems.join("\n"));
        } else {
            self.complete_build(duration_ms);
        }
    }

    pub fn start_build(&self) {
        self.status.send_replace(BuildStatus::InProgress {
            started_at: Instant::now(),
        });
    }

    pub fn complete_build(&self, duration_ms: u64) {
        self.status.send_replace(BuildStatus::Success { duration_ms });
    }

    pub fn fail_build(&self, error: String) {
        self.status.send_replace(BuildStatus::Failed { error });
    }

    pub fn status(&self) -> BuildStatus {
        self.status.borrow().clone()
    }

    pub fn update_cache(&self, cache: BundleCache) {
        *self.cache.write() = Arc::new(cache);
    }

    pub fn cache(&self) -> Arc<BundleCache> {
        Arc::clone(&self.cache.read())
    }

    pub fn get_cached_file(&self, path: &str) -> Option<CachedFile> {
        self.cache.read().get(path).cloned()
    }

    /// Wait until a build has settled, or `timeout` elapses.
    ///
    /// Returns the status observed last, which is still in progress (or not
    /// started) on timeout.
    pub async fn wait_settled(&self, timeout: Duration) -> BuildStatus {
        let mut rx = self.status.subscribe();
        let settled = tokio::time::timeout(timeout, async {
            rx.wait_for(BuildStatus::is_settled)
                .await
                .map(|status| status.clone())
                .ok()
        })
        .await;

        match settled {
            Ok(Some(status)) => status,
            _ => self.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_status_transitions() {
        let state = BuildState::new();
        assert_eq!(state.status(), BuildStatus::NotStarted);

        state.start_build();
        assert!(state.status().is_in_progress());

        state.complete_build(12);
        assert!(state.status().is_success());

        state.fail_build("boom".to_string());
        assert_eq!(state.status().error(), Some("boom"));
    }

    #[test]
    fn test_settle_follows_policy() {
        let state = BuildState::new();
        let summary = StatsSummary {
            errors: Vec::new(),
            warnings: vec!["unused import".to_string()],
        };

        state.settle(&summary, 5);
        assert!(state.status().is_success());

        state.set_blocking_policy(BlockingPolicy::ErrorsAndWarnings);
        state.settle(&summary, 5);
        assert_eq!(state.status().error(), Some("unused import"));
    }

    #[test]
    fn test_cache_swap() {
        let state = BuildState::new();
        let mut cache = BundleCache::new();
        cache.insert(
            "/app.js".to_string(),
            b"console.log(1)".to_vec(),
            "application/javascript".to_string(),
        );
        state.update_cache(cache);

        let file = state.get_cached_file("/app.js").unwrap();
        assert_eq!(file.content_type, "application/javascript");
        assert!(state.get_cached_file("/missing.js").is_none());
    }

    #[test]
    fn test_merge_missing_keeps_first() {
        let mut first = BundleCache::new();
        first.insert("/a.js".to_string(), b"first".to_vec(), "application/javascript".to_string());
        let mut second = BundleCache::new();
        second.insert("/a.js".to_string(), b"second".to_vec(), "application/javascript".to_string());
        second.insert("/b.js".to_string(), b"b".to_vec(), "application/javascript".to_string());

        first.merge_missing(&second);
        assert_eq!(first.get("/a.js").unwrap().content, b"first");
        assert_eq!(first.paths(), vec!["/a.js", "/b.js"]);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_from_extension("app.js"), "application/javascript");
        assert_eq!(content_type_from_extension("app.js.map"), "application/json");
        assert_eq!(content_type_from_extension("index.html"), "text/html");
        assert_eq!(content_type_from_extension("blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_wait_settled_returns_after_build() {
        let state = Arc::new(BuildState::new());
        state.start_build();

        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.wait_settled(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.complete_build(5);

        let status = waiter.await.unwrap();
        assert_eq!(status, BuildStatus::Success { duration_ms: 5 });
    }

    #[tokio::test]
    async fn test_wait_settled_times_out() {
        let state = BuildState::new();
        let status = state.wait_settled(Duration::from_millis(20)).await;
        assert_eq!(status, BuildStatus::NotStarted);
    }
}
