use super::{Middleware, Outcome};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::ServeDir;

/// Options for static content directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentOptions {
    /// File served for directory requests
    pub index: Option<String>,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            index: Some("index.html".to_string()),
        }
    }
}

/// Serves files from one directory on disk.
///
/// Anything the directory does not have is passed on.
pub struct ContentMiddleware {
    dir: PathBuf,
    options: ContentOptions,
}

impl ContentMiddleware {
    pub fn new(dir: PathBuf, options: ContentOptions) -> Self {
        Self { dir, options }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl Middleware for ContentMiddleware {
    fn name(&self) -> &str {
        "content"
    }

    async fn handle(&self, req: Request) -> Outcome {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Outcome::Next(req);
        }

        let mut uri = req.uri().clone();
        if uri.path().ends_with('/') {
            if let Some(index) = &self.options.index {
                let path = format!("{}{}", uri.path(), index);
                match path.parse() {
                    Ok(rewritten) => uri = rewritten,
                    Err(_) => return Outcome::Next(req),
                }
            }
        }

        let mut lookup = axum::http::Request::builder()
            .method(req.method().clone())
            .uri(uri);
        for (name, value) in req.headers() {
            lookup = lookup.header(name, value);
        }
        let Ok(lookup) = lookup.body(Body::empty()) else {
            return Outcome::Next(req);
        };

        let service = ServeDir::new(&self.dir).append_index_html_on_directories(false);
        let response = match service.oneshot(lookup).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => Outcome::Next(req),
            _ => Outcome::Respond(response.map(Body::new)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn get(path: &str) -> Request {
        axum::http::Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("home.html"), "<h1>custom</h1>").unwrap();
        std::fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_serves_file() {
        let dir = site();
        let middleware = ContentMiddleware::new(dir.path().to_path_buf(), ContentOptions::default());

        let Outcome::Respond(response) = middleware.handle(get("/robots.txt")).await else {
            panic!("expected a response");
        };
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_index() {
        let dir = site();
        let middleware = ContentMiddleware::new(
            dir.path().to_path_buf(),
            ContentOptions {
                index: Some("home.html".to_string()),
            },
        );

        let Outcome::Respond(response) = middleware.handle(get("/")).await else {
            panic!("expected a response");
        };
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<h1>custom</h1>");
    }

    #[tokio::test]
    async fn test_missing_file_passes_on() {
        let dir = site();
        let middleware = ContentMiddleware::new(dir.path().to_path_buf(), ContentOptions::default());
        let Outcome::Next(req) = middleware.handle(get("/nope.js")).await else {
            panic!("expected the request back");
        };
        assert_eq!(req.uri().path(), "/nope.js");
    }
}
