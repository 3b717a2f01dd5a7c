//! End-to-end tests
//!
//! Every test binds real listeners on 127.0.0.1 with ephemeral ports.

use axum::response::IntoResponse;
use futures_util::{stream, SinkExt, StreamExt};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

use crate::config::{
    HttpsOption, IndexOption, LiveReloadOption, LiveReloadSettings, Root, ServerConfig,
    ServerOptions,
};
use crate::http::{from_fn, MiddlewareFactory, Next};
use crate::integration::fixtures::*;
use crate::server::{AssetServer, ChangedFile};

fn with_live_reload(options: ServerOptions) -> ServerOptions {
    ServerOptions {
        livereload: Some(LiveReloadOption::Settings(LiveReloadSettings {
            port: Some(0),
        })),
        ..options
    }
}

#[tokio::test]
async fn test_unknown_route_gets_index_document() {
    let site = Site::new();
    let (_server, addr) = start(local_options(site.path())).await;

    let response = client()
        .get(format!("http://{}/users/42/settings", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.text().await.unwrap(), INDEX_HTML);
}

#[tokio::test]
async fn test_existing_file_wins_over_fallback() {
    let site = Site::new();
    let (_server, addr) = start(local_options(site.path())).await;

    let body = client()
        .get(format!("http://{}/css/app.css", addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, APP_CSS);
}

#[tokio::test]
async fn test_roots_are_searched_in_order() {
    let app = Site::new();
    let vendor = Site::new();
    vendor.write("app.js", "vendor copy");
    vendor.write("lib.js", "vendor only");

    let options = local_options(app.path());
    let options = ServerOptions {
        root: Some(Root::List(vec![
            app.path().to_path_buf(),
            vendor.path().to_path_buf(),
        ])),
        ..options
    };
    let (_server, addr) = start(options).await;
    let http = client();

    let shadowed = http
        .get(format!("http://{}/app.js", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(shadowed.text().await.unwrap(), APP_JS);

    let second = http
        .get(format!("http://{}/lib.js", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(second.text().await.unwrap(), "vendor only");
}

#[tokio::test]
async fn test_unhandled_request_without_index() {
    let site = Site::new();
    let options = ServerOptions {
        index: Some(IndexOption::Enabled(false)),
        ..local_options(site.path())
    };
    let (_server, addr) = start(options).await;

    let response = client()
        .get(format!("http://{}/missing", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Cannot GET /missing\n");

    let response = client()
        .post(format!("http://{}/app.js", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_start_logs_url_once() {
    let (logs, _guard) = CapturedLogs::install();
    let site = Site::new();
    let (_server, addr) = start(local_options(site.path())).await;

    let url = format!("http://127.0.0.1:{}", addr.port());
    assert_eq!(logs.count(&format!("Server started {}", url)), 1);
    assert_eq!(logs.count("Error on starting server"), 0);
}

#[tokio::test]
async fn test_bind_failure_is_logged_not_raised() {
    let (logs, _guard) = CapturedLogs::install();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let site = Site::new();
    let options = ServerOptions {
        port: Some(port),
        ..local_options(site.path())
    };
    let mut server = AssetServer::from_options(options).unwrap();

    assert!(server.start().await.is_none());
    assert!(server.local_addr().is_none());
    assert_eq!(logs.count("Error on starting server"), 1);
    assert_eq!(logs.count("Server started"), 0);
}

#[tokio::test]
async fn test_user_middleware_runs_first() {
    let site = Site::new();
    let factory = MiddlewareFactory::new(|_config: &ServerConfig| {
        Ok(vec![from_fn("health", |req: axum::extract::Request, next: Next| async move {
            if req.uri().path() == "/api/health" {
                "ok".into_response()
            } else {
                next.run(req).await
            }
        })])
    });
    let options = ServerOptions {
        middleware: Some(factory),
        ..local_options(site.path())
    };
    let (_server, addr) = start(options).await;
    let http = client();

    let health = http
        .get(format!("http://{}/api/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(health.text().await.unwrap(), "ok");

    let page = http
        .get(format!("http://{}/elsewhere", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(page.text().await.unwrap(), INDEX_HTML);
}

#[tokio::test]
async fn test_live_reload_snippet_is_injected_into_documents() {
    let site = Site::new();
    let (server, addr) = start(with_live_reload(local_options(site.path()))).await;
    assert!(server.live_reload_addr().is_some());
    let http = client();

    let page = http
        .get(format!("http://{}/some/route", addr))
        .header("accept", "text/html,application/xhtml+xml")
        .send()
        .await
        .unwrap();
    assert_eq!(page.status(), 200);
    let html = page.text().await.unwrap();
    let snippet_at = html.find("livereload.js?snipver=1").unwrap();
    let body_close = html.rfind("</body>").unwrap();
    assert!(snippet_at < body_close);

    let script = http
        .get(format!("http://{}/app.js", addr))
        .header("accept", "text/html")
        .send()
        .await
        .unwrap();
    assert_eq!(script.text().await.unwrap(), APP_JS);
}

#[tokio::test]
async fn test_reload_reaches_websocket_clients() {
    let site = Site::new();
    let (server, _addr) = start(with_live_reload(local_options(site.path()))).await;
    let bridge = server.live_reload_addr().unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/livereload", bridge))
        .await
        .unwrap();
    socket
        .send(Message::Text(
            r#"{"command":"hello","protocols":["http://livereload.com/protocols/official-7"]}"#
                .into(),
        ))
        .await
        .unwrap();

    let hello = socket.next().await.unwrap().unwrap();
    let hello: serde_json::Value = serde_json::from_str(hello.to_text().unwrap()).unwrap();
    assert_eq!(hello["command"], "hello");
    assert_eq!(hello["serverName"], "asset-server");

    let changed: Vec<ChangedFile> = server
        .reload(stream::iter(vec![ChangedFile::new("css/app.css")]))
        .collect()
        .await;
    assert_eq!(changed.len(), 1);

    let reload = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reload: serde_json::Value = serde_json::from_str(reload.to_text().unwrap()).unwrap();
    assert_eq!(reload["command"], "reload");
    assert_eq!(reload["path"], "css/app.css");
    assert_eq!(reload["liveCSS"], true);
}

#[tokio::test]
async fn test_changed_endpoint_reports_clients() {
    let site = Site::new();
    let (server, _addr) = start(with_live_reload(local_options(site.path()))).await;
    let bridge = server.live_reload_addr().unwrap();

    let (_socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/livereload", bridge))
        .await
        .unwrap();
    let live_reload = server.live_reload().unwrap();
    assert!(eventually(|| live_reload.clients() == 1).await);

    let json: serde_json::Value = client()
        .post(format!("http://{}/changed", bridge))
        .json(&serde_json::json!({ "files": ["index.html", "app.js"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["clients"], 1);
    assert_eq!(json["files"], serde_json::json!(["index.html", "app.js"]));
}

#[tokio::test]
async fn test_https_with_bundled_certificates() {
    let site = Site::new();
    let options = ServerOptions {
        https: Some(HttpsOption::Enabled(true)),
        ..local_options(site.path())
    };
    let (server, addr) = start(options).await;
    assert!(server.url().starts_with("https://"));

    let response = tls_get(&server.config().cert_dir, addr, "/deep/link").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains(INDEX_HTML));
}

#[tokio::test]
async fn test_live_reload_shares_https_material() {
    let site = Site::new();
    let options = ServerOptions {
        https: Some(HttpsOption::Enabled(true)),
        ..with_live_reload(local_options(site.path()))
    };
    let (server, _) = start(options).await;
    let bridge_addr = server.live_reload_addr().unwrap();

    let response = tls_get(&server.config().cert_dir, bridge_addr, "/livereload.js").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("application/javascript"));
    assert!(response.contains("/livereload"));
}

#[tokio::test]
async fn test_force_close_all_drops_open_connections() {
    let site = Site::new();
    let (server, addr) = start(local_options(site.path())).await;

    let mut idle = TcpStream::connect(addr).await.unwrap();
    assert!(eventually(|| server.open_connections() == 1).await);

    assert_eq!(server.force_close_all(), 1);
    assert_eq!(server.force_close_all(), 0);

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(eventually(|| server.open_connections() == 0).await);
}

#[tokio::test]
async fn test_close_stops_accepting() {
    let site = Site::new();
    let (mut server, addr) = start(local_options(site.path())).await;

    server.close();
    tokio::time::timeout(Duration::from_secs(5), server.wait())
        .await
        .unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_dropping_the_server_closes_connections() {
    let site = Site::new();
    let (server, addr) = start(local_options(site.path())).await;

    let mut idle = TcpStream::connect(addr).await.unwrap();
    assert!(eventually(|| server.open_connections() == 1).await);
    drop(server);

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_missing_index_is_a_server_error() {
    let site = Site::new();
    let options = ServerOptions {
        index: Some(IndexOption::Path(PathBuf::from("shell.html"))),
        ..local_options(site.path())
    };
    let (_server, addr) = start(options).await;

    let response = client()
        .get(format!("http://{}/route", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    site.write("shell.html", "<p>shell</p>");
    let response = client()
        .get(format!("http://{}/route", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "<p>shell</p>");
}
