//! Static file and SPA fallback stages

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, warn};

use super::middleware::{Middleware, Next, StageKind};

/// Serves files below one root directory.
///
/// Requests it cannot satisfy (missing file, or a method other than
/// `GET`/`HEAD`) fall through to the next stage.
pub struct ServeStatic {
    root: PathBuf,
    service: ServeDir,
}

impl ServeStatic {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let service = ServeDir::new(&root).append_index_html_on_directories(true);
        Self { root, service }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Middleware for ServeStatic {
    fn kind(&self) -> StageKind {
        StageKind::Static(self.root.clone())
    }

    fn handle(self: Arc<Self>, req: Request, next: Next) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            if req.method() != Method::GET && req.method() != Method::HEAD {
                return next.run(req).await;
            }

            let lookup = bodyless_copy(&req);
            let response = match self.service.clone().oneshot(lookup).await {
                Ok(response) => response,
                Err(never) => match never {},
            };

            if response.status() == StatusCode::NOT_FOUND {
                debug!("{} not under {}", req.uri().path(), self.root.display());
                return next.run(req).await;
            }
            response.map(Body::new)
        })
    }
}

/// Copy of `req` without its body, so the original can still be passed on
fn bodyless_copy(req: &Request) -> Request {
    let mut copy = Request::new(Body::empty());
    *copy.method_mut() = req.method().clone();
    *copy.uri_mut() = req.uri().clone();
    *copy.version_mut() = req.version();
    *copy.headers_mut() = req.headers().clone();
    copy
}

/// Answers any request that reaches it with the index document, streamed
/// from disk.
pub struct SpaFallback {
    index: PathBuf,
    content_type: HeaderValue,
}

impl SpaFallback {
    pub fn new(index: impl Into<PathBuf>) -> Self {
        let index = index.into();
        let mime = mime_guess::from_path(&index).first_or_octet_stream();
        let content_type = HeaderValue::from_str(mime.essence_str())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        Self {
            index,
            content_type,
        }
    }
}

impl Middleware for SpaFallback {
    fn kind(&self) -> StageKind {
        StageKind::Fallback(self.index.clone())
    }

    fn handle(self: Arc<Self>, req: Request, _next: Next) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let file = match tokio::fs::File::open(&self.index).await {
                Ok(file) => file,
                Err(err) => {
                    warn!(
                        "Cannot open index {} for {}: {}",
                        self.index.display(),
                        req.uri().path(),
                        err
                    );
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            };

            let body = Body::from_stream(ReaderStream::new(file));
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, self.content_type.clone())],
                body,
            )
                .into_response()
        })
    }
}
