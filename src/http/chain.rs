//! Builds the fixed-order handler chain from a resolved configuration

use std::sync::Arc;
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

use super::handlers::{ServeStatic, SpaFallback};
use super::inject::LiveReloadInjector;
use super::middleware::{Middleware, MiddlewareChain};

/// Build the chain:
///
/// 1. user stages from the middleware factory
/// 2. live-reload injector, when live reload is on
/// 3. one static stage per root, in order
/// 4. SPA fallback, when an index document is configured
/// 5. a final static stage for the first root
///
/// Stage 5 sits behind the fallback and is only reached when the index is
/// disabled.
pub fn build_chain(config: &ServerConfig) -> Result<MiddlewareChain> {
    let mut stages: Vec<Arc<dyn Middleware>> = match &config.middleware {
        Some(factory) => factory.build(config).map_err(ServerError::Middleware)?,
        None => Vec::new(),
    };

    if let Some(livereload) = &config.livereload {
        stages.push(Arc::new(LiveReloadInjector::new(livereload.port)));
    }

    for root in config.root.paths() {
        stages.push(Arc::new(ServeStatic::new(root)));
    }

    if let Some(index) = &config.index {
        stages.push(Arc::new(SpaFallback::new(index)));
    }

    let first_root = config
        .root
        .first()
        .ok_or_else(|| ServerError::Config("root list must not be empty".to_string()))?;
    stages.push(Arc::new(ServeStatic::new(first_root)));

    let chain = MiddlewareChain::new(stages);
    debug!("Middleware chain: {:?}", chain);
    Ok(chain)
}
