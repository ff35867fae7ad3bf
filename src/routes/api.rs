//! Convention API routes. Every path under the mount point goes through the route table.

use crate::handlers::dispatch;
use crate::state::AppState;
use crate::store::StoreProvider;
use axum::{routing::any, Router};
use tower_http::limit::RequestBodyLimitLayer;

/// Mount with `Router::nest("/api", api_routes(state, limit))`.
pub fn api_routes<P: StoreProvider>(state: AppState<P>, body_limit: usize) -> Router {
    Router::new()
        .route("/*path", any(dispatch::<P>))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

/// Common routes plus the API nested under `/api`.
pub fn app<P: StoreProvider>(state: AppState<P>, body_limit: usize) -> Router {
    super::common_routes_with_ready(state.clone()).nest("/api", api_routes(state, body_limit))
}
