//! Middleware chain
//!
//! A chain is an ordered list of [`Middleware`] stages. Each stage either
//! answers the request itself or hands it to the rest of the chain through
//! [`Next`]. A request that runs off the end of the chain gets a plain
//! `404`.

use axum::{
    extract::Request,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::config::ServerConfig;
use crate::error::BoxError;

/// What a stage does, used for logging and for inspecting a built chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    /// Supplied by the user's middleware factory
    Custom(String),
    /// Injects the live-reload client snippet into HTML responses
    LiveReload { port: u16 },
    /// Serves files below a root directory
    Static(PathBuf),
    /// Answers every request with the index document
    Fallback(PathBuf),
}

/// One request handler in the chain
pub trait Middleware: Send + Sync + 'static {
    fn kind(&self) -> StageKind {
        StageKind::Custom(std::any::type_name::<Self>().to_string())
    }

    /// Answer `req`, or pass it on with `next.run(req)`
    fn handle(self: Arc<Self>, req: Request, next: Next) -> BoxFuture<'static, Response>;
}

/// The remainder of the chain after the current stage
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn Middleware>]>,
    position: usize,
}

impl Next {
    /// Run the remaining stages
    pub fn run(self, req: Request) -> BoxFuture<'static, Response> {
        match self.stages.get(self.position).cloned() {
            Some(stage) => {
                let next = Next {
                    stages: self.stages,
                    position: self.position + 1,
                };
                stage.handle(req, next)
            }
            None => Box::pin(async move { not_found(&req) }),
        }
    }
}

fn not_found(req: &Request) -> Response {
    let body = format!("Cannot {} {}\n", req.method(), req.uri().path());
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Built, immutable handler chain. Cloning is cheap.
#[derive(Clone)]
pub struct MiddlewareChain {
    stages: Arc<[Arc<dyn Middleware>]>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Stage kinds in dispatch order
    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|stage| stage.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Dispatch a request through every stage in order
    pub fn dispatch(&self, req: Request) -> BoxFuture<'static, Response> {
        Next {
            stages: Arc::clone(&self.stages),
            position: 0,
        }
        .run(req)
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

impl tower::Service<Request> for MiddlewareChain {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let response = self.dispatch(req);
        Box::pin(async move { Ok(response.await) })
    }
}

/// Middleware built from an async closure
pub struct FromFn<F, Fut> {
    name: String,
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wrap a closure `(Request, Next) -> impl Future<Output = Response>` as a
/// chain stage
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Middleware>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(FromFn {
        name: name.into(),
        f,
        _future: PhantomData,
    })
}

impl<F, Fut> Middleware for FromFn<F, Fut>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn kind(&self) -> StageKind {
        StageKind::Custom(self.name.clone())
    }

    fn handle(self: Arc<Self>, req: Request, next: Next) -> BoxFuture<'static, Response> {
        Box::pin((self.f)(req, next))
    }
}

type FactoryFn = dyn Fn(&ServerConfig) -> Result<Vec<Arc<dyn Middleware>>, BoxError> + Send + Sync;

/// Produces the user stages placed at the head of the chain
#[derive(Clone)]
pub struct MiddlewareFactory(Arc<FactoryFn>);

impl MiddlewareFactory {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ServerConfig) -> Result<Vec<Arc<dyn Middleware>>, BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(factory))
    }

    pub fn build(&self, config: &ServerConfig) -> Result<Vec<Arc<dyn Middleware>>, BoxError> {
        (self.0)(config)
    }
}

impl fmt::Debug for MiddlewareFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MiddlewareFactory(..)")
    }
}
