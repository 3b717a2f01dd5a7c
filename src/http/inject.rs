//! Live-reload snippet injection
//!
//! Rewrites HTML responses produced further down the chain so the browser
//! loads the live-reload client from the side channel.

use axum::{
    body::Body,
    extract::Request,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

use super::middleware::{Middleware, Next, StageKind};

/// Paths with these extensions are never treated as documents
const IGNORED_EXTENSIONS: &[&str] = &[
    "js", "css", "svg", "ico", "woff", "woff2", "ttf", "eot", "png", "jpg", "jpeg", "gif", "webp",
    "mp4", "webm", "json", "map", "wasm", "txt", "xml", "pdf", "zip",
];

pub struct LiveReloadInjector {
    port: u16,
    snippet: String,
}

impl LiveReloadInjector {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            snippet: client_snippet(port),
        }
    }

    pub fn snippet(&self) -> &str {
        &self.snippet
    }
}

/// Script tag that loads `livereload.js` from the page's own host
pub fn client_snippet(port: u16) -> String {
    format!(
        "<script>document.write('<script src=\"//' + (location.hostname || 'localhost') + ':{}/livereload.js?snipver=1\"></' + 'script>')</script>",
        port
    )
}

impl Middleware for LiveReloadInjector {
    fn kind(&self) -> StageKind {
        StageKind::LiveReload { port: self.port }
    }

    fn handle(self: Arc<Self>, req: Request, next: Next) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let wants_document = req.method() == Method::GET
                && accepts_html(&req)
                && !has_ignored_extension(req.uri().path());

            let response = next.run(req).await;
            if !wants_document || response.status() != StatusCode::OK || !is_html(&response) {
                return response;
            }

            let (mut parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!("Failed to buffer document for live reload: {}", err);
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            };

            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(inject_snippet(&bytes, &self.snippet)))
        })
    }
}

fn accepts_html(req: &Request) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("html"))
        .unwrap_or(false)
}

fn has_ignored_extension(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| {
            !ext.contains('/') && IGNORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
        .unwrap_or(false)
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/html"))
        .unwrap_or(false)
}

/// Insert `snippet` before the last `</body>`, else before the last
/// `</html>`, else right after the doctype. Documents that already load
/// the client, or have none of those markers, are returned unchanged.
pub fn inject_snippet(html: &[u8], snippet: &str) -> Vec<u8> {
    let lower = html.to_ascii_lowercase();
    if find(&lower, b"livereload.js").is_some() {
        return html.to_vec();
    }

    let at = rfind(&lower, b"</body>")
        .or_else(|| rfind(&lower, b"</html>"))
        .or_else(|| {
            find(&lower, b"<!doctype")
                .and_then(|start| find(&lower[start..], b">").map(|end| start + end + 1))
        });

    match at {
        Some(at) => {
            let mut out = Vec::with_capacity(html.len() + snippet.len());
            out.extend_from_slice(&html[..at]);
            out.extend_from_slice(snippet.as_bytes());
            out.extend_from_slice(&html[at..]);
            out
        }
        None => html.to_vec(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
