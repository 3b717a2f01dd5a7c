//! Axum router configuration

use axum::Router;
use tower_http::trace::TraceLayer;

use super::middleware::MiddlewareChain;

/// Create the Axum router; every request is dispatched through `chain`
pub fn create_router(chain: MiddlewareChain, debug: bool) -> Router {
    let router = Router::new().fallback_service(chain);

    if debug {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}
