//! The request pipeline.
//!
//! Requests walk an ordered list of [`Middleware`]. Each one either answers
//! or hands the request on; whatever nobody answers becomes a 404. The
//! server fills the list in a fixed order:
//!
//! 1. the `add` hook, which may also place the built-ins early
//! 2. the bundle middleware, unless already placed
//! 3. the content middleware for each `content` directory, unless already placed
//! 4. the hot client, unless disabled

mod bundle;
mod content;

pub use bundle::{BundleMiddleware, BundleMiddlewareFactory, DefaultBundleFactory, DevOptions};
pub use content::{ContentMiddleware, ContentOptions};

use crate::compiler::Compiler;
use crate::options::Options;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::MethodRouter;
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};

/// Result of offering a request to a middleware.
pub enum Outcome {
    /// The middleware answered
    Respond(Response),
    /// Pass the request to the next middleware
    Next(Request),
}

/// One stage of the request pipeline.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn handle(&self, req: Request) -> Outcome;
}

/// Answers requests for one exact path with an axum handler.
pub struct RouteMiddleware {
    path: String,
    router: Router,
}

impl RouteMiddleware {
    pub fn new(path: &str, handler: MethodRouter) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let router = Router::new().route(&path, handler);
        Self { path, router }
    }
}

#[async_trait]
impl Middleware for RouteMiddleware {
    fn name(&self) -> &str {
        &self.path
    }

    async fn handle(&self, req: Request) -> Outcome {
        if req.uri().path() != self.path {
            return Outcome::Next(req);
        }
        match self.router.clone().oneshot(req).await {
            Ok(response) => Outcome::Respond(response),
            Err(never) => match never {},
        }
    }
}

/// The middleware list under construction.
///
/// Handed to the `add` hook so callers can register their own middleware
/// and decide where the built-ins go.
pub struct MiddlewareRegistry {
    stack: Vec<Arc<dyn Middleware>>,
    options: Arc<Options>,
    compiler: Arc<dyn Compiler>,
    bundle_factory: Arc<dyn BundleMiddlewareFactory>,
    client_script: Option<String>,
    bundle_placed: bool,
    content_placed: bool,
}

impl MiddlewareRegistry {
    pub fn new(
        options: Arc<Options>,
        compiler: Arc<dyn Compiler>,
        bundle_factory: Arc<dyn BundleMiddlewareFactory>,
    ) -> Self {
        Self {
            stack: Vec::new(),
            options,
            compiler,
            bundle_factory,
            client_script: None,
            bundle_placed: false,
            content_placed: false,
        }
    }

    /// Script the bundle middleware should inject into HTML pages.
    pub(crate) fn set_client_script(&mut self, path: impl Into<String>) {
        self.client_script = Some(path.into());
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.compiler
    }

    pub fn use_middleware<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.stack.push(Arc::new(middleware));
        self
    }

    pub fn use_shared(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.stack.push(middleware);
        self
    }

    /// Answer `path` with an axum method router.
    pub fn route(&mut self, path: &str, handler: MethodRouter) -> &mut Self {
        self.use_middleware(RouteMiddleware::new(path, handler))
    }

    /// Place the bundle middleware now. Later calls do nothing.
    pub fn bundle(&mut self) -> &mut Self {
        if self.bundle_placed {
            return self;
        }
        self.bundle_placed = true;

        let mut dev = self.options.dev.clone();
        if let Some(script) = &self.client_script {
            dev.entry("clientScript")
                .or_insert_with(|| Value::String(script.clone()));
        }

        let middleware = self
            .bundle_factory
            .create(Arc::clone(&self.compiler), &dev);
        self.use_shared(middleware)
    }

    /// Place the content middleware for every configured directory now.
    /// Later calls do nothing.
    pub fn content(&mut self, content_options: ContentOptions) -> &mut Self {
        if self.content_placed {
            return self;
        }
        self.content_placed = true;

        let dirs = self.options.content.clone();
        for dir in dirs {
            self.use_middleware(ContentMiddleware::new(dir, content_options.clone()));
        }
        self
    }

    /// Names of the registered middleware, in order.
    pub fn names(&self) -> Vec<String> {
        self.stack.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Turn the list into a router that walks it for every request.
    pub(crate) fn into_router(self) -> Router {
        let chain: Chain = Arc::new(self.stack);

        Router::new()
            .fallback(dispatch)
            .with_state(chain)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
    }
}

type Chain = Arc<Vec<Arc<dyn Middleware>>>;

async fn dispatch(State(chain): State<Chain>, req: Request) -> Response {
    let mut req = req;
    for middleware in chain.iter() {
        match middleware.handle(req).await {
            Outcome::Respond(response) => return response,
            Outcome::Next(unhandled) => req = unhandled,
        }
    }
    not_found(&req)
}

fn not_found(req: &Request) -> Response {
    let mut response = Response::new(Body::from(format!(
        "Cannot {} {}",
        req.method(),
        req.uri().path()
    )));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
