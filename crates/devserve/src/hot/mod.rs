//! Hot client: a WebSocket companion pushing build notifications.
//!
//! The socket server listens on its own port (`hot.port`, or the server
//! port plus one) and broadcasts one JSON message per build milestone:
//!
//! | event              | message                                   |
//! |--------------------|-------------------------------------------|
//! | `build-started`    | `{"type":"invalid"}`                      |
//! | `compiler-warning` | `{"type":"warnings","data":[...]}`        |
//! | `compiler-error`   | `{"type":"errors","data":[...]}`          |
//! | `build-finished`   | `{"type":"ok"}`                           |
//!
//! New connections are greeted with `{"type":"options","data":{"hot":..,"reload":..}}`.
//! The browser script answering these lives at [`CLIENT_SCRIPT_PATH`] on the
//! main server.

use crate::bus::{Event, EventBus, EventKind};
use crate::error::ServerError;
use crate::logger::Logger;
use crate::middleware::{Middleware, RouteMiddleware};
use crate::options::Options;
use crate::server::resolve_addr;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Where the browser script is served on the main server.
pub const CLIENT_SCRIPT_PATH: &str = "/__devserve_hot__.js";

const CLIENT_SCRIPT: &str = include_str!("../../assets/hot-client.js");

/// Everything a hot client needs to start.
#[derive(Clone)]
pub struct HotContext {
    pub options: Arc<Options>,
    pub hot: Map<String, Value>,
    pub bus: EventBus,
    pub logger: Logger,
}

/// A running hot client.
#[async_trait]
pub trait HotClient: Send + Sync {
    /// Address of the socket server, if it runs one
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Middleware to mount on the main server
    fn middleware(&self) -> Option<Arc<dyn Middleware>>;

    /// Stop the socket server and forwarding. Must be idempotent.
    async fn close(&self);
}

/// Starts hot clients.
#[async_trait]
pub trait HotClientFactory: Send + Sync {
    async fn start(&self, ctx: HotContext) -> Result<Arc<dyn HotClient>, ServerError>;
}

/// Starts a [`WebSocketHotClient`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHotClientFactory;

#[async_trait]
impl HotClientFactory for DefaultHotClientFactory {
    async fn start(&self, ctx: HotContext) -> Result<Arc<dyn HotClient>, ServerError> {
        let client = WebSocketHotClient::start(ctx).await?;
        Ok(Arc::new(client))
    }
}

/// Hot client settings derived from the `hot` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotSettings {
    /// Host the socket server binds to
    pub server_host: String,
    /// Host the browser connects to; empty means "the page's host"
    pub client_host: String,
    pub port: u16,
    pub hot: bool,
    pub reload: bool,
}

impl HotSettings {
    pub fn from_options(options: &Options, hot: &Map<String, Value>) -> Result<Self, ServerError> {
        let (server_host, client_host) = match hot.get("host") {
            Some(Value::String(host)) => (host.clone(), host.clone()),
            Some(Value::Object(sides)) => {
                let server = sides
                    .get("server")
                    .and_then(Value::as_str)
                    .unwrap_or(&options.host)
                    .to_string();
                let client = sides
                    .get("client")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| server.clone());
                (server, client)
            }
            _ => (options.host.clone(), options.host.clone()),
        };

        let port = match hot.get("port") {
            None | Some(Value::Null) => {
                if options.port == 0 {
                    0
                } else {
                    options.port.checked_add(1).ok_or_else(|| {
                        ServerError::HotClient("no port left above the server port".to_string())
                    })?
                }
            }
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| ServerError::HotClient(format!("invalid hot.port {}", n)))?,
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| ServerError::HotClient(format!("invalid hot.port {}", s)))?,
            Some(other) => {
                return Err(ServerError::HotClient(format!("invalid hot.port {}", other)));
            }
        };

        let client_host = match client_host.as_str() {
            "0.0.0.0" | "::" | "[::]" => String::new(),
            _ => client_host,
        };

        Ok(Self {
            server_host,
            client_host,
            port,
            hot: hot.get("hot").and_then(Value::as_bool).unwrap_or(true),
            reload: hot.get("reload").and_then(Value::as_bool).unwrap_or(true),
        })
    }
}

/// Messages pushed to browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum HotMessage {
    Options { hot: bool, reload: bool },
    Invalid,
    Ok,
    Warnings(Vec<String>),
    Errors(Vec<String>),
}

impl HotMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    fn for_event(event: &Event) -> Option<Self> {
        match event {
            Event::BuildStarted { .. } => Some(HotMessage::Invalid),
            Event::BuildFinished { .. } => Some(HotMessage::Ok),
            Event::CompilerWarning { json, .. } => Some(HotMessage::Warnings(json.warnings.clone())),
            Event::CompilerError { json, .. } => Some(HotMessage::Errors(json.errors.clone())),
            Event::Listening { .. } | Event::Close => None,
        }
    }
}

struct Hub {
    tx: broadcast::Sender<String>,
    greeting: String,
    shutdown: watch::Receiver<bool>,
}

/// WebSocket server broadcasting build notifications.
pub struct WebSocketHotClient {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    script: Arc<dyn Middleware>,
    logger: Logger,
}

impl WebSocketHotClient {
    /// Bind the socket server and subscribe to the bus.
    ///
    /// # Errors
    ///
    /// Fails when the settings are invalid or the port cannot be bound.
    pub async fn start(ctx: HotContext) -> Result<Self, ServerError> {
        let settings = HotSettings::from_options(&ctx.options, &ctx.hot)?;
        let logger = ctx.logger.named("hot");

        let addr = resolve_addr(&settings.server_host, settings.port).await?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let (tx, _) = broadcast::channel(64);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));

        for kind in [
            EventKind::BuildStarted,
            EventKind::CompilerWarning,
            EventKind::CompilerError,
            EventKind::BuildFinished,
        ] {
            let tx = tx.clone();
            let closed = Arc::clone(&closed);
            ctx.bus.on(kind, move |event| {
                if closed.load(Ordering::Acquire) {
                    return Ok(());
                }
                if let Some(message) = HotMessage::for_event(event) {
                    // No receivers just means no browser is connected.
                    let _ = tx.send(message.to_json());
                }
                Ok(())
            });
        }

        let hub = Arc::new(Hub {
            tx,
            greeting: HotMessage::Options {
                hot: settings.hot,
                reload: settings.reload,
            }
            .to_json(),
            shutdown: shutdown_rx.clone(),
        });

        let router = Router::new().route("/", get(upgrade)).with_state(hub);

        let mut stop = shutdown_rx;
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            });
            if let Err(e) = server.await {
                tracing::warn!("hot client server error: {}", e);
            }
        });

        let script = client_script(&settings, addr.port());
        logger.info(format!("WebSocket server listening on ws://{}", addr));

        Ok(Self {
            addr,
            shutdown,
            task: Mutex::new(Some(task)),
            closed,
            script: Arc::new(RouteMiddleware::new(
                CLIENT_SCRIPT_PATH,
                get(move || {
                    let script = script.clone();
                    async move {
                        (
                            [
                                (header::CONTENT_TYPE, "application/javascript"),
                                (header::CACHE_CONTROL, "no-cache"),
                            ],
                            script,
                        )
                    }
                }),
            )),
            logger,
        })
    }
}

#[async_trait]
impl HotClient for WebSocketHotClient {
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    fn middleware(&self) -> Option<Arc<dyn Middleware>> {
        Some(Arc::clone(&self.script))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        self.logger.debug("WebSocket server closed");
    }
}

fn client_script(settings: &HotSettings, port: u16) -> String {
    CLIENT_SCRIPT
        .replace("__DEVSERVE_HOT_HOST__", &settings.client_host)
        .replace("__DEVSERVE_HOT_PORT__", &port.to_string())
}

async fn upgrade(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| session(socket, hub)).into_response()
}

async fn session(mut socket: WebSocket, hub: Arc<Hub>) {
    let mut updates = hub.tx.subscribe();
    let mut shutdown = hub.shutdown.clone();

    if socket
        .send(Message::Text(hub.greeting.clone().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "hot client lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
