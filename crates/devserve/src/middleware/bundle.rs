//! Serves the compiler's in-memory output.

use super::{Middleware, Outcome};
use crate::compiler::{BuildStatus, BundleCache, CachedFile, Compiler};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Builds the middleware that serves a compiler's output.
pub trait BundleMiddlewareFactory: Send + Sync {
    fn create(&self, compiler: Arc<dyn Compiler>, dev: &Map<String, Value>) -> Arc<dyn Middleware>;
}

/// Creates a [`BundleMiddleware`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBundleFactory;

impl BundleMiddlewareFactory for DefaultBundleFactory {
    fn create(&self, compiler: Arc<dyn Compiler>, dev: &Map<String, Value>) -> Arc<dyn Middleware> {
        Arc::new(BundleMiddleware::new(compiler, DevOptions::from_map(dev)))
    }
}

/// Options read from the `dev` mapping. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevOptions {
    /// URL prefix the output is served under, always with both slashes
    pub public_path: String,
    /// Extra response headers
    pub headers: Vec<(String, String)>,
    /// File served for directory requests, `None` to disable
    pub index: Option<String>,
    /// How long a request waits for the first build
    pub wait_timeout: Duration,
    /// Script injected into served HTML pages
    pub client_script: Option<String>,
}

impl Default for DevOptions {
    fn default() -> Self {
        Self {
            public_path: "/".to_string(),
            headers: Vec::new(),
            index: Some("index.html".to_string()),
            wait_timeout: Duration::from_secs(30),
            client_script: None,
        }
    }
}

impl DevOptions {
    pub fn from_map(dev: &Map<String, Value>) -> Self {
        let mut options = Self::default();

        if let Some(path) = dev.get("publicPath").and_then(Value::as_str) {
            let trimmed = path.trim_matches('/');
            options.public_path = if trimmed.is_empty() {
                "/".to_string()
            } else {
                format!("/{}/", trimmed)
            };
        }

        if let Some(headers) = dev.get("headers").and_then(Value::as_object) {
            options.headers = headers
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), value)
                })
                .collect();
        }

        match dev.get("index") {
            Some(Value::String(index)) => options.index = Some(index.clone()),
            Some(Value::Bool(false)) => options.index = None,
            _ => {}
        }

        if let Some(ms) = dev.get("waitTimeout").and_then(Value::as_u64) {
            options.wait_timeout = Duration::from_millis(ms);
        }

        if let Some(script) = dev.get("clientScript").and_then(Value::as_str) {
            options.client_script = Some(script.to_string());
        }

        options
    }
}

/// Serves files from a compiler's [`BundleCache`].
///
/// Requests arriving before the first build settles wait for it (bounded by
/// `wait_timeout`). While the last build is broken, HTML requests get an
/// error page; other files are served from the previous output.
pub struct BundleMiddleware {
    compiler: Arc<dyn Compiler>,
    options: DevOptions,
}

impl BundleMiddleware {
    pub fn new(compiler: Arc<dyn Compiler>, options: DevOptions) -> Self {
        Self { compiler, options }
    }

    /// Map a request path onto a cache key, or `None` outside `public_path`.
    fn cache_path(&self, path: &str) -> Option<String> {
        let public = &self.options.public_path;
        let rest = if public == "/" {
            path.strip_prefix('/')?
        } else if path == public.trim_end_matches('/') {
            ""
        } else {
            path.strip_prefix(public.as_str())?
        };

        let mut key = format!("/{}", rest);
        if key.ends_with('/') {
            if let Some(index) = &self.options.index {
                key.push_str(index);
            }
        }
        Some(key)
    }

    fn respond(&self, status: StatusCode, content_type: &str, body: Vec<u8>) -> Response {
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        for (name, value) in &self.options.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!("Ignoring invalid header {}: {}", name, value),
            }
        }

        response
    }

    fn serve_file(&self, file: CachedFile) -> Response {
        let body = match &self.options.client_script {
            Some(script) if file.content_type.starts_with("text/html") => {
                inject_client_script(&file.content, script)
            }
            _ => file.content,
        };
        self.respond(StatusCode::OK, &file.content_type, body)
    }
}

#[async_trait]
impl Middleware for BundleMiddleware {
    fn name(&self) -> &str {
        "bundle"
    }

    async fn handle(&self, req: Request) -> Outcome {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Outcome::Next(req);
        }
        let Some(key) = self.cache_path(req.uri().path()) else {
            return Outcome::Next(req);
        };

        let status = self
            .compiler
            .state()
            .wait_settled(self.options.wait_timeout)
            .await;

        let wants_html = key.ends_with(".html") || key.ends_with('/');
        if let BuildStatus::Failed { error } = &status {
            if wants_html {
                let page = error_overlay(error);
                return Outcome::Respond(self.respond(
                    StatusCode::OK,
                    "text/html; charset=utf-8",
                    page.into_bytes(),
                ));
            }
        }

        let cache = self.compiler.assets();
        if let Some(file) = cache.get(&key) {
            return Outcome::Respond(self.serve_file(file.clone()));
        }

        // No index page in the output: generate one around the entry script.
        let is_root = key == "/"
            || self
                .options
                .index
                .as_deref()
                .is_some_and(|index| key == format!("/{}", index));
        if is_root {
            if let Some(entry) = find_entry_point(&cache) {
                let page = index_html(&format!(
                    "{}{}",
                    self.options.public_path,
                    entry.trim_start_matches('/')
                ));
                let file = CachedFile {
                    content: page.into_bytes(),
                    content_type: "text/html; charset=utf-8".to_string(),
                };
                return Outcome::Respond(self.serve_file(file));
            }
        }

        Outcome::Next(req)
    }
}

/// First JavaScript file in path order, skipping source maps and
/// internal paths.
fn find_entry_point(cache: &BundleCache) -> Option<String> {
    cache.paths().into_iter().find(|path| {
        (path.ends_with(".js") || path.ends_with(".mjs")) && !path.starts_with("/__")
    })
}

fn index_html(entry: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"utf-8\">\n</head>\n<body>\n  <div id=\"root\"></div>\n  <script type=\"module\" src=\"{}\"></script>\n</body>\n</html>\n",
        html_escape(entry)
    )
}

/// Add a script tag before `</body>`, or at the end without one.
fn inject_client_script(content: &[u8], script: &str) -> Vec<u8> {
    let html = String::from_utf8_lossy(content);
    let script_tag = format!(r#"<script src="{}"></script>"#, html_escape(script));

    if let Some(pos) = html.rfind("</body>") {
        let mut result = String::with_capacity(html.len() + script_tag.len() + 4);
        result.push_str(&html[..pos]);
        result.push_str("  ");
        result.push_str(&script_tag);
        result.push('\n');
        result.push_str(&html[pos..]);
        return result.into_bytes();
    }

    let mut result = html.into_owned();
    result.push('\n');
    result.push_str(&script_tag);
    result.into_bytes()
}

fn error_overlay(error: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"utf-8\">\n  <title>Build failed</title>\n  <style>body{{background:#1e1e1e;color:#e8e8e8;font-family:monospace;padding:2rem}}pre{{color:#ff6b6b;white-space:pre-wrap}}</style>\n</head>\n<body>\n  <h1>Failed to compile</h1>\n  <pre>{}</pre>\n</body>\n</html>\n",
        html_escape(error)
    )
}

fn html_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::testing::ScriptedCompiler;
    use crate::compiler::Stats;
    use serde_json::json;

    async fn built(files: &[(&str, &str, &str)], dev: Value) -> BundleMiddleware {
        let compiler = Arc::new(ScriptedCompiler::new(Vec::new()));
        let mut cache = BundleCache::new();
        for (path, content, content_type) in files {
            cache.insert(
                path.to_string(),
                content.as_bytes().to_vec(),
                content_type.to_string(),
            );
        }
        compiler.state().update_cache(cache);
        compiler.run().await.unwrap();

        let dev = dev.as_object().cloned().unwrap_or_default();
        BundleMiddleware::new(compiler, DevOptions::from_map(&dev))
    }

    fn get(path: &str) -> Request {
        axum::http::Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_dev_options_parsing() {
        let dev = json!({
            "publicPath": "assets",
            "headers": { "X-Test": "yes" },
            "index": false,
            "logLevel": "warn"
        });
        let options = DevOptions::from_map(dev.as_object().unwrap());
        assert_eq!(options.public_path, "/assets/");
        assert_eq!(options.headers, vec![("X-Test".to_string(), "yes".to_string())]);
        assert_eq!(options.index, None);
    }

    #[tokio::test]
    async fn test_serves_cached_file_with_headers() {
        let middleware = built(
            &[("/app.js", "console.log(1)", "application/javascript")],
            json!({ "headers": { "X-Test": "yes" } }),
        )
        .await;

        let Outcome::Respond(response) = middleware.handle(get("/app.js")).await else {
            panic!("expected a response");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-test"], "yes");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/javascript"
        );
        assert_eq!(body_of(response).await, "console.log(1)");
    }

    #[tokio::test]
    async fn test_public_path_prefix() {
        let middleware = built(
            &[("/app.js", "x", "application/javascript")],
            json!({ "publicPath": "/static/" }),
        )
        .await;

        assert!(matches!(
            middleware.handle(get("/static/app.js")).await,
            Outcome::Respond(_)
        ));
        assert!(matches!(
            middleware.handle(get("/app.js")).await,
            Outcome::Next(_)
        ));
    }

    #[tokio::test]
    async fn test_index_and_script_injection() {
        let middleware = built(
            &[(
                "/index.html",
                "<html><body><h1>Hi</h1></body></html>",
                "text/html",
            )],
            json!({ "clientScript": "/__devserve_hot__.js" }),
        )
        .await;

        let Outcome::Respond(response) = middleware.handle(get("/")).await else {
            panic!("expected a response");
        };
        let body = body_of(response).await;
        let script = body.find(r#"<script src="/__devserve_hot__.js"></script>"#).unwrap();
        assert!(script < body.find("</body>").unwrap());
    }

    #[tokio::test]
    async fn test_generated_index_loads_entry() {
        let middleware = built(&[("/main.js", "x", "application/javascript")], json!({})).await;

        let Outcome::Respond(response) = middleware.handle(get("/")).await else {
            panic!("expected a response");
        };
        let body = body_of(response).await;
        assert!(body.contains(r#"<script type="module" src="/main.js"></script>"#));
    }

    #[tokio::test]
    async fn test_missing_file_falls_through() {
        let middleware = built(&[], json!({})).await;
        assert!(matches!(
            middleware.handle(get("/missing.js")).await,
            Outcome::Next(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_build_shows_overlay() {
        let mut broken = Stats::new("scripted");
        broken.errors.push("Unexpected <token>".to_string());
        let compiler = Arc::new(ScriptedCompiler::new(vec![broken]));
        compiler.run().await.unwrap();
        let middleware = BundleMiddleware::new(compiler, DevOptions::default());

        let Outcome::Respond(response) = middleware.handle(get("/")).await else {
            panic!("expected a response");
        };
        let body = body_of(response).await;
        assert!(body.contains("Failed to compile"));
        assert!(body.contains("Unexpected &lt;token&gt;"));
    }

    #[tokio::test]
    async fn test_post_falls_through() {
        let middleware = built(&[("/app.js", "x", "application/javascript")], json!({})).await;
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/app.js")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(middleware.handle(req).await, Outcome::Next(_)));
    }
}
