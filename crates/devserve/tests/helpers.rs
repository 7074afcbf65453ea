//! Shared test utilities for devserve integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use devserve::collaborators::{BrowserOpener, ClipboardWriter};
use devserve::compiler::{BuildState, BundleCache, Hooks};
use devserve::options::resolve;
use devserve::{
    BundleConfig, Collaborators, Compiler, ConfigSource, Event, EventKind, Flags, Options, Server,
    ServerHandle, Stats,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Compiler returning scripted stats, one per cycle, and publishing a fixed
/// set of files.
#[derive(Default)]
pub struct TestCompiler {
    hooks: Hooks,
    state: BuildState,
    script: Mutex<VecDeque<Stats>>,
    files: Vec<(String, String, String)>,
    watch_root: Option<PathBuf>,
    watch_setups: Arc<AtomicUsize>,
}

impl TestCompiler {
    pub fn new(script: Vec<Stats>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, path: &str, content: &str, content_type: &str) -> Self {
        self.files
            .push((path.to_string(), content.to_string(), content_type.to_string()));
        self
    }

    pub fn with_watch_root(mut self, root: PathBuf) -> Self {
        self.watch_root = Some(root);
        self
    }

    /// How often a file watcher has been set up for this compiler.
    pub fn watch_setups(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.watch_setups)
    }
}

#[async_trait]
impl Compiler for TestCompiler {
    fn name(&self) -> &str {
        "test"
    }

    fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    fn state(&self) -> &BuildState {
        &self.state
    }

    fn watch_roots(&self) -> Vec<PathBuf> {
        self.watch_setups.fetch_add(1, Ordering::SeqCst);
        self.watch_root.iter().cloned().collect()
    }

    async fn build(&self) -> Stats {
        let mut cache = BundleCache::new();
        for (path, content, content_type) in &self.files {
            cache.insert(path.clone(), content.as_bytes().to_vec(), content_type.clone());
        }
        self.state.update_cache(cache);

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Stats::new("test"))
    }
}

pub fn warning_stats(message: &str) -> Stats {
    let mut stats = Stats::new("test");
    stats.warnings.push(message.to_string());
    stats
}

pub fn error_stats(message: &str) -> Stats {
    let mut stats = Stats::new("test");
    stats.errors.push(message.to_string());
    stats
}

#[derive(Default)]
pub struct RecordingBrowser {
    pub opened: Mutex<Vec<(String, Vec<String>)>>,
}

impl BrowserOpener for RecordingBrowser {
    fn open(&self, url: &str, app: &[String]) -> anyhow::Result<()> {
        self.opened.lock().push((url.to_string(), app.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingClipboard {
    pub written: Mutex<Vec<String>>,
}

impl ClipboardWriter for RecordingClipboard {
    fn write(&self, text: &str) -> anyhow::Result<()> {
        self.written.lock().push(text.to_string());
        Ok(())
    }
}

/// A server under test with its recording collaborators.
pub struct Harness {
    pub server: Server,
    pub browser: Arc<RecordingBrowser>,
    pub clipboard: Arc<RecordingClipboard>,
}

impl Harness {
    pub async fn start(self) -> ServerHandle {
        self.server.start().await.unwrap()
    }
}

/// Resolve `serve` on an ephemeral loopback port.
pub async fn options(serve: Value, flags: Flags) -> Options {
    let mut serve = serve;
    if let Some(map) = serve.as_object_mut() {
        map.entry("host").or_insert_with(|| Value::from("127.0.0.1"));
        map.entry("port").or_insert_with(|| Value::from(0));
    }
    resolve(
        ConfigSource::Raw(BundleConfig::new("true").with_serve(serve)),
        flags,
    )
    .await
    .unwrap()
}

pub async fn harness(serve: Value, compiler: TestCompiler) -> Harness {
    harness_with(serve, Flags::default(), compiler).await
}

pub async fn harness_with(serve: Value, flags: Flags, compiler: TestCompiler) -> Harness {
    let mut options = options(serve, flags).await;
    options.compiler = Some(Arc::new(compiler));

    let browser = Arc::new(RecordingBrowser::default());
    let clipboard = Arc::new(RecordingClipboard::default());
    let collaborators = Collaborators {
        browser: Arc::clone(&browser) as Arc<dyn BrowserOpener>,
        clipboard: Arc::clone(&clipboard) as Arc<dyn ClipboardWriter>,
        ..Collaborators::default()
    };

    Harness {
        server: Server::new(options).with_collaborators(collaborators),
        browser,
        clipboard,
    }
}

/// Forward every event of the given kinds into a channel.
pub fn record(server: &Server, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<EventKind> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in kinds {
        let tx = tx.clone();
        server.bus().on(*kind, move |event: &Event| {
            let _ = tx.send(event.kind());
            Ok(())
        });
    }
    rx
}

/// Receive the next recorded kind, failing after a few seconds.
pub async fn next(rx: &mut mpsc::UnboundedReceiver<EventKind>) -> EventKind {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Collect recorded kinds until `last` shows up.
pub async fn until(rx: &mut mpsc::UnboundedReceiver<EventKind>, last: EventKind) -> Vec<EventKind> {
    let mut seen = Vec::new();
    loop {
        let kind = next(rx).await;
        seen.push(kind);
        if kind == last {
            return seen;
        }
    }
}
