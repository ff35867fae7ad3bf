//! Shared application state for all routes.

use crate::handlers::ControllerRegistry;
use crate::routes::RouteTable;
use crate::store::StoreProvider;
use std::sync::Arc;

pub struct AppState<P: StoreProvider> {
    /// Opens one store per request.
    pub provider: P,
    pub controllers: Arc<ControllerRegistry<P>>,
    pub routes: Arc<RouteTable>,
}

impl<P: StoreProvider> AppState<P> {
    pub fn new(provider: P, controllers: ControllerRegistry<P>, routes: RouteTable) -> Self {
        AppState {
            provider,
            controllers: Arc::new(controllers),
            routes: Arc::new(routes),
        }
    }
}

impl<P: StoreProvider> Clone for AppState<P> {
    fn clone(&self) -> Self {
        AppState {
            provider: self.provider.clone(),
            controllers: Arc::clone(&self.controllers),
            routes: Arc::clone(&self.routes),
        }
    }
}
