//! Server lifecycle.
//!
//! A [`Server`] moves through `idle → starting → listening → closing →
//! closed`. [`Server::start`] wires the compiler to the event bus, builds the
//! middleware chain, binds the listener and hands back a [`ServerHandle`].
//! Everything `start` acquired is released by [`ServerHandle::close`].

mod listener;
mod tls;

pub use listener::resolve_addr;

use crate::bus::{Event, EventBus};
use crate::collaborators::{BrowserOpener, ClipboardWriter, SystemBrowser, SystemClipboard};
use crate::compiler::{
    self, attach, BuildState, Compiler, CompilerBinding, PendingWatch, Watching,
};
use crate::error::{Result, ServerError};
use crate::hot::{
    DefaultHotClientFactory, HotClient, HotClientFactory, HotContext, CLIENT_SCRIPT_PATH,
};
use crate::logger::Logger;
use crate::middleware::{
    BundleMiddlewareFactory, ContentOptions, DefaultBundleFactory, MiddlewareRegistry,
};
use crate::options::{OpenOption, Options};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Whether this build can serve HTTP/2.
///
/// Decided at compile time by the `http2` cargo feature. Without it the
/// listener only speaks HTTP/1.1, TLS never offers `h2`, and `http2: true`
/// is rejected during option resolution.
pub fn supports_http2() -> bool {
    cfg!(feature = "http2")
}

/// Where the server ended up listening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub local_addr: SocketAddr,
    /// Browsable base URL, e.g. `http://localhost:8080`
    pub url: String,
    pub https: bool,
    pub http2: bool,
}

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Listening,
    Closing,
    Closed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Listening => "listening",
            LifecycleState::Closing => "closing",
            LifecycleState::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replaceable parts of the server.
#[derive(Clone)]
pub struct Collaborators {
    pub bundle: Arc<dyn BundleMiddlewareFactory>,
    pub hot: Arc<dyn HotClientFactory>,
    pub browser: Arc<dyn BrowserOpener>,
    pub clipboard: Arc<dyn ClipboardWriter>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            bundle: Arc::new(DefaultBundleFactory),
            hot: Arc::new(DefaultHotClientFactory),
            browser: Arc::new(SystemBrowser),
            clipboard: Arc::new(SystemClipboard),
        }
    }
}

/// A server that has not started yet.
pub struct Server {
    options: Arc<Options>,
    collaborators: Collaborators,
    logger: Logger,
    bus: EventBus,
}

impl Server {
    /// Create an idle server. Handlers in `options.on` are registered on
    /// its bus immediately.
    pub fn new(mut options: Options) -> Self {
        let bus = EventBus::new(std::mem::take(&mut options.on));
        let logger = Logger::new(options.log_level, options.log_time);
        Self {
            options: Arc::new(options),
            collaborators: Collaborators::default(),
            logger,
            bus,
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// The bus events will be emitted on. Subscribing here before
    /// [`start`](Self::start) guarantees seeing `listening`.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Start listening.
    ///
    /// # Errors
    ///
    /// - `ConfigError` when no compiler can be built from the options
    /// - `ServerError` when TLS material, the file watcher, the hot client or
    ///   the listener cannot be set up
    ///
    /// Anything acquired before the failure is released again.
    pub async fn start(self) -> Result<ServerHandle> {
        let Server {
            options,
            collaborators,
            logger,
            bus,
        } = self;
        tracing::debug!(state = %LifecycleState::Starting, "server starting");

        let acceptor = options
            .https
            .as_ref()
            .map(|https| tls::acceptor(https, options.http2))
            .transpose()?;

        let compiler = match &options.compiler {
            Some(compiler) => Arc::clone(compiler),
            None => compiler::from_targets(&options.targets)?,
        };

        let binding = attach(
            Arc::clone(&compiler),
            bus.clone(),
            logger.clone(),
            options.blocking_policy(),
        );

        let pending_watch = match PendingWatch::new(Arc::clone(&compiler), logger.clone()) {
            Ok(pending) => pending,
            Err(e) => {
                binding.detach();
                return Err(e.into());
            }
        };

        let mut registry = MiddlewareRegistry::new(
            Arc::clone(&options),
            Arc::clone(&compiler),
            Arc::clone(&collaborators.bundle),
        );
        if options.hot.is_enabled() {
            registry.set_client_script(CLIENT_SCRIPT_PATH);
        }
        if let Some(add) = &options.add {
            add(&mut registry);
        }
        registry.bundle();
        registry.content(ContentOptions::default());

        let hot = match options.hot.as_map() {
            Some(hot) => {
                let ctx = HotContext {
                    options: Arc::clone(&options),
                    hot: hot.clone(),
                    bus: bus.clone(),
                    logger: logger.clone(),
                };
                match collaborators.hot.start(ctx).await {
                    Ok(client) => {
                        if let Some(middleware) = client.middleware() {
                            registry.use_shared(middleware);
                        }
                        Some(client)
                    }
                    Err(e) => {
                        binding.detach();
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        let router = registry.into_router();

        let bound = listener::bind(&options.host, options.port)
            .await
            .and_then(|tcp| {
                let addr = tcp.local_addr().map_err(|source| ServerError::Bind {
                    addr: format!("{}:{}", options.host, options.port),
                    source,
                })?;
                Ok((tcp, addr))
            });
        let (tcp, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                if let Some(hot) = &hot {
                    hot.close().await;
                }
                binding.detach();
                return Err(e.into());
            }
        };

        let http2 = options.http2 && supports_http2();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let serve_task = listener::spawn(tcp, router, acceptor, http2, shutdown_rx);

        let info = ServerInfo {
            local_addr,
            url: base_url(&options.host, local_addr, options.is_https()),
            https: options.is_https(),
            http2,
        };

        let (closed, _) = watch::channel(false);
        let handle = ServerHandle {
            inner: Arc::new(Inner {
                info: info.clone(),
                options: Arc::clone(&options),
                bus: bus.clone(),
                compiler: Arc::clone(&compiler),
                binding,
                hot,
                watching: Mutex::new(None),
                shutdown,
                serve_task: Mutex::new(Some(serve_task)),
                state: Mutex::new(LifecycleState::Listening),
                closed,
                logger: logger.clone(),
            }),
        };

        if let Err(e) = bus.emit(&Event::Listening {
            server: info.clone(),
            options: Arc::clone(&options),
        }) {
            logger.error(format!("listening handler failed: {}", e));
        }

        logger.info(format!("Project is running at {}", info.url));
        announce(&options, &info, &collaborators, &logger);

        *handle.inner.watching.lock() = Some(pending_watch.start());
        Ok(handle)
    }
}

/// Clipboard write or browser launch once the URL is known.
fn announce(options: &Options, info: &ServerInfo, collaborators: &Collaborators, logger: &Logger) {
    match &options.open {
        OpenOption::Enabled { app, path } => {
            let target = match path {
                Some(path) => join_url(&info.url, path),
                None => info.url.clone(),
            };
            match collaborators.browser.open(&target, app) {
                Ok(()) => logger.debug(format!("Opened browser at {}", target)),
                Err(e) => logger.warn(format!("Failed to open browser: {}", e)),
            }
        }
        OpenOption::Disabled if options.clipboard => {
            match collaborators.clipboard.write(&info.url) {
                Ok(()) => logger.info("Server URI copied to clipboard"),
                Err(e) => logger.debug(format!("Clipboard unavailable: {}", e)),
            }
        }
        OpenOption::Disabled => {}
    }
}

fn base_url(host: &str, addr: SocketAddr, https: bool) -> String {
    let scheme = if https { "https" } else { "http" };
    let host = match host {
        "0.0.0.0" | "::" | "[::]" => "localhost".to_string(),
        host if host.contains(':') && !host.starts_with('[') => format!("[{}]", host),
        host => host.to_string(),
    };
    format!("{}://{}:{}", scheme, host, addr.port())
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

struct Inner {
    info: ServerInfo,
    options: Arc<Options>,
    bus: EventBus,
    compiler: Arc<dyn Compiler>,
    binding: CompilerBinding,
    hot: Option<Arc<dyn HotClient>>,
    watching: Mutex<Option<Watching>>,
    shutdown: watch::Sender<bool>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<LifecycleState>,
    closed: watch::Sender<bool>,
    logger: Logger,
}

/// A listening server.
///
/// Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("info", &self.inner.info)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    pub fn info(&self) -> &ServerInfo {
        &self.inner.info
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.info.local_addr
    }

    pub fn url(&self) -> &str {
        &self.inner.info.url
    }

    pub fn options(&self) -> &Arc<Options> {
        &self.inner.options
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.inner.compiler
    }

    pub fn build_state(&self) -> &BuildState {
        self.inner.compiler.state()
    }

    /// Address of the hot client's socket server, when one runs.
    pub fn hot_addr(&self) -> Option<SocketAddr> {
        self.inner.hot.as_ref().and_then(|hot| hot.local_addr())
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    /// Tear the server down. Calling it again, or concurrently, waits for
    /// the first teardown and does nothing else.
    pub async fn close(&self) {
        self.close_with(|| {}).await;
    }

    /// [`close`](Self::close), then run `callback`.
    pub async fn close_with<F>(&self, callback: F)
    where
        F: FnOnce() + Send,
    {
        let first = {
            let mut state = self.inner.state.lock();
            if *state == LifecycleState::Listening {
                *state = LifecycleState::Closing;
                true
            } else {
                false
            }
        };

        if first {
            self.teardown().await;
        } else {
            self.wait_closed().await;
        }
        callback();
    }

    async fn teardown(&self) {
        let inner = &self.inner;

        inner.shutdown.send_replace(true);
        let task = inner.serve_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }

        let watching = inner.watching.lock().take();
        if let Some(watching) = watching {
            watching.close().await;
        }

        inner.binding.detach();

        if let Some(hot) = &inner.hot {
            hot.close().await;
        }

        if let Err(e) = inner.bus.emit(&Event::Close) {
            inner.logger.error(format!("close handler failed: {}", e));
        }
        inner.bus.clear();

        *inner.state.lock() = LifecycleState::Closed;
        inner.closed.send_replace(true);
        inner.logger.debug("Server closed");
    }

    async fn wait_closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return;
            }
            if closed.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(base_url("localhost", addr, false), "http://localhost:8080");
        assert_eq!(base_url("0.0.0.0", addr, true), "https://localhost:8080");
        assert_eq!(base_url("::1", addr, false), "http://[::1]:8080");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://localhost:8080", "/app"), "http://localhost:8080/app");
        assert_eq!(join_url("http://localhost:8080", "app"), "http://localhost:8080/app");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(LifecycleState::Listening.to_string(), "listening");
        assert_eq!(LifecycleState::Closed.as_str(), "closed");
    }
}
