//! Development asset server
//!
//! Serves static files from one or more root directories, falls back to an
//! index document for single-page-app routes, optionally terminates TLS
//! and injects a live-reload client into HTML pages.
//!
//! ```no_run
//! use asset_server::{AssetServer, ServerOptions};
//!
//! # async fn run() -> asset_server::Result<()> {
//! let mut server = AssetServer::from_options(ServerOptions::new("public"))?;
//! if server.start().await.is_some() {
//!     server.wait().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod config_file;
pub mod error;
pub mod http;
pub mod livereload;
pub mod server;
pub mod signal;
pub mod tracker;
pub mod transport;

#[cfg(test)]
mod integration;

pub use config::{
    HttpsOption, IndexOption, LiveReloadOption, LiveReloadSettings, Root, ServerConfig,
    ServerOptions, TlsSettings,
};
pub use error::{Result, ServerError};
pub use http::{from_fn, Middleware, MiddlewareChain, MiddlewareFactory, Next, StageKind};
pub use livereload::LiveReloadBridge;
pub use server::{AssetServer, ChangedFile, FileChange};
pub use tracker::ConnectionTracker;
