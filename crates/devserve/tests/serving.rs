//! Integration tests for what the running server answers.

mod helpers;

use axum::routing::get;
use devserve::middleware::ContentOptions;
use devserve::{EventKind, Flags, MiddlewareRegistry, Server};
use futures::StreamExt;
use helpers::{harness, options, record, until, TestCompiler};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::Message;

fn app() -> TestCompiler {
    TestCompiler::new(Vec::new())
        .with_file("/main.js", "console.log('hi')", "application/javascript")
        .with_file(
            "/index.html",
            "<html><body><h1>app</h1></body></html>",
            "text/html; charset=utf-8",
        )
}

#[tokio::test]
async fn test_serves_bundle_from_memory() {
    let harness = harness(json!({ "hot": false }), app()).await;
    let handle = harness.start().await;

    let response = reqwest::get(format!("{}/main.js", handle.url())).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/javascript"
    );
    assert_eq!(response.text().await.unwrap(), "console.log('hi')");

    handle.close().await;
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let harness = harness(json!({ "hot": false }), app()).await;
    let handle = harness.start().await;

    let response = reqwest::get(format!("{}/nope.css", handle.url())).await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Cannot GET /nope.css");

    handle.close().await;
}

#[tokio::test]
async fn test_serves_content_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();

    let harness = harness(
        json!({ "hot": false, "content": dir.path() }),
        app(),
    )
    .await;
    let handle = harness.start().await;

    let body = reqwest::get(format!("{}/robots.txt", handle.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "User-agent: *");

    handle.close().await;
}

#[tokio::test]
async fn test_add_hook_routes_come_first() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("main.js"), "from disk").unwrap();

    let flags = Flags {
        add: Some(Arc::new(|registry: &mut MiddlewareRegistry| {
            registry.route("/api/health", get(|| async { "ok" }));
            registry.content(ContentOptions::default());
        })),
        ..Flags::default()
    };
    let serve = json!({ "hot": false, "clipboard": false, "content": dir.path() });
    let mut options = options(serve, flags).await;
    options.compiler = Some(Arc::new(app()));
    let handle = Server::new(options).start().await.unwrap();

    let health = reqwest::get(format!("{}/api/health", handle.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(health, "ok");

    // Content was placed by the hook, ahead of the bundle.
    let main = reqwest::get(format!("{}/main.js", handle.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(main, "from disk");

    handle.close().await;
}

#[tokio::test]
async fn test_hot_script_served_and_injected() {
    let harness = harness(json!({}), app()).await;
    let handle = harness.start().await;

    let script = reqwest::get(format!("{}/__devserve_hot__.js", handle.url()))
        .await
        .unwrap();
    assert_eq!(script.status(), 200);
    let script = script.text().await.unwrap();
    let hot_port = handle.hot_addr().unwrap().port();
    assert!(script.contains(&hot_port.to_string()));

    let page = reqwest::get(format!("{}/", handle.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.contains(r#"<script src="/__devserve_hot__.js"></script>"#));

    handle.close().await;
}

#[tokio::test]
async fn test_hot_socket_greets_and_forwards_builds() {
    let harness = harness(json!({}), app()).await;
    let mut events = record(&harness.server, &[EventKind::BuildFinished]);
    let handle = harness.start().await;
    until(&mut events, EventKind::BuildFinished).await;

    let hot = handle.hot_addr().unwrap();
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/", hot))
        .await
        .unwrap();

    let greeting = read_json(&mut socket).await;
    assert_eq!(greeting["type"], "options");
    assert_eq!(greeting["data"], json!({ "hot": true, "reload": true }));

    let compiler = Arc::clone(handle.compiler());
    compiler.run().await.unwrap();

    assert_eq!(read_json(&mut socket).await["type"], "invalid");
    assert_eq!(read_json(&mut socket).await["type"], "ok");

    handle.close().await;
}

async fn read_json<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a hot message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

async fn get_insecure(url: &str) -> reqwest::Response {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap()
        .get(url)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_https_from_pfx_bundle() {
    let harness = harness(
        json!({
            "hot": false,
            "https": { "pfx": fixture("bundle.pfx"), "passphrase": "devserve" }
        }),
        app(),
    )
    .await;
    let handle = harness.start().await;
    assert!(handle.url().starts_with("https://"));

    let response = get_insecure(&format!("{}/main.js", handle.url())).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "console.log('hi')");

    handle.close().await;
}

#[tokio::test]
async fn test_https_from_encrypted_key() {
    let harness = harness(
        json!({
            "hot": false,
            "https": {
                "cert": fixture("cert.pem"),
                "key": fixture("key-encrypted.pem"),
                "passphrase": "devserve"
            }
        }),
        app(),
    )
    .await;
    let handle = harness.start().await;

    let response = get_insecure(&format!("{}/main.js", handle.url())).await;
    assert_eq!(response.status(), 200);

    handle.close().await;
}

#[cfg(feature = "http2")]
#[tokio::test]
async fn test_http2_only_when_enabled() {
    let client = reqwest::Client::builder()
        .http2_prior_knowledge()
        .build()
        .unwrap();

    let handle = harness(json!({ "hot": false, "http2": true }), app())
        .await
        .start()
        .await;
    let response = client
        .get(format!("{}/main.js", handle.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.version(), reqwest::Version::HTTP_2);
    handle.close().await;

    let handle = harness(json!({ "hot": false }), app()).await.start().await;
    let refused = client
        .get(format!("{}/main.js", handle.url()))
        .send()
        .await;
    assert!(refused.is_err());
    handle.close().await;
}
