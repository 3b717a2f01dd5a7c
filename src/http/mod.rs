//! HTTP request pipeline
//!
//! - Middleware trait and the ordered chain that dispatches requests
//! - Chain builder for a resolved configuration
//! - Static file and SPA fallback stages
//! - Live-reload snippet injection
//! - Axum router wrapping the chain

pub mod chain;
pub mod handlers;
pub mod inject;
pub mod middleware;
pub mod routes;

pub use chain::build_chain;
pub use handlers::{ServeStatic, SpaFallback};
pub use inject::LiveReloadInjector;
pub use middleware::{from_fn, Middleware, MiddlewareChain, MiddlewareFactory, Next, StageKind};
pub use routes::create_router;
