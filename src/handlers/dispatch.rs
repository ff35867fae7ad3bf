//! Convention dispatcher: resolves `/api/*path` through the route table and runs the controller action.

use super::ActionCall;
use crate::error::AppError;
use crate::state::AppState;
use crate::store::StoreProvider;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::Method,
    response::Response,
};
use std::collections::HashMap;

pub async fn dispatch<P: StoreProvider>(
    State(state): State<AppState<P>>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let route = state
        .routes
        .resolve(&method, &path)
        .ok_or_else(|| AppError::NotFound(format!("no route for /{}", path.trim_start_matches('/'))))?;
    let endpoint = state
        .controllers
        .get(&route.controller)
        .ok_or_else(|| AppError::NotFound(format!("no controller '{}'", route.controller)))?;
    let action = route.action_or(&method).to_string();
    tracing::debug!(
        rule = route.rule,
        controller = %route.controller,
        action = %action,
        id = ?route.id,
        "route matched"
    );
    let mut store = state.provider.open().await?;
    let call = ActionCall {
        method,
        action,
        id: route.id,
        name: route.name,
        query,
        body,
    };
    endpoint.call(&mut store, call).await
}
