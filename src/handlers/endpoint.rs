//! Object-safe action endpoints and the controller registry the dispatcher looks them up in.

use crate::controller::Controller;
use crate::entity::Entity;
use crate::error::AppError;
use crate::page::PageRequest;
use crate::service::{bind_body, bind_model};
use crate::store::{EntityStore, StoreProvider};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One resolved request, ready to run against a controller.
#[derive(Clone, Debug)]
pub struct ActionCall {
    pub method: Method,
    pub action: String,
    pub id: Option<i64>,
    pub name: Option<String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

#[derive(Serialize)]
struct Affected {
    affected: u64,
}

/// A controller erased over its entity type.
#[async_trait]
pub trait Endpoint<S: EntityStore>: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, store: &mut S, call: ActionCall) -> Result<Response, AppError>;
}

/// Verb an action accepts, or `None` when the controller has no such action.
fn action_verb(action: &str) -> Option<Method> {
    match action {
        "get" | "page" => Some(Method::GET),
        "post" => Some(Method::POST),
        "put" => Some(Method::PUT),
        "delete" => Some(Method::DELETE),
        _ => None,
    }
}

#[async_trait]
impl<T: Entity, S: EntityStore> Endpoint<S> for Controller<T> {
    fn name(&self) -> &str {
        Controller::name(self)
    }

    async fn call(&self, store: &mut S, call: ActionCall) -> Result<Response, AppError> {
        let action = call.action.to_ascii_lowercase();
        let no_action = || AppError::NotFound(format!("no action '{}' on controller '{}'", call.action, self.name()));
        let verb = action_verb(&action).ok_or_else(no_action)?;
        if verb != call.method {
            return Err(AppError::MethodNotAllowed(format!(
                "{} does not accept {}",
                call.action, call.method
            )));
        }
        if call.name.is_some() {
            return Err(no_action());
        }
        let response = match (action.as_str(), call.id) {
            ("get", None) => Json(self.get_all(store).await?).into_response(),
            ("get", Some(id)) => match self.get(store, id).await? {
                Some(entity) => Json(entity).into_response(),
                None => return Err(AppError::NotFound(format!("{} {}", T::table_name(), id))),
            },
            ("post", None) => {
                let affected = self.post(store, bind_model::<T>(&call.body)?).await?;
                Json(Affected { affected }).into_response()
            }
            ("put", None) => Json(self.put(store, bind_model::<T>(&call.body)?).await?).into_response(),
            ("delete", Some(id)) => Json(Affected {
                affected: self.delete(store, id).await?,
            })
            .into_response(),
            ("delete", None) => {
                let value = bind_body::<T>(&call.body)?;
                Json(Affected {
                    affected: self.delete_value(store, &value).await?,
                })
                .into_response()
            }
            ("page", None) => {
                let page = PageRequest::from_query(&call.query)?;
                Json(self.page(store, &page).await?).into_response()
            }
            _ => return Err(no_action()),
        };
        Ok(response)
    }
}

/// Controllers by case-insensitive name.
pub struct ControllerRegistry<P: StoreProvider> {
    endpoints: HashMap<String, Arc<dyn Endpoint<P::Store>>>,
}

impl<P: StoreProvider> Default for ControllerRegistry<P> {
    fn default() -> Self {
        ControllerRegistry {
            endpoints: HashMap::new(),
        }
    }
}

impl<P: StoreProvider> ControllerRegistry<P> {
    pub fn new() -> Self {
        ControllerRegistry::default()
    }

    /// Add a controller. A later registration under the same name replaces the earlier one.
    pub fn register<T: Entity>(mut self, controller: Controller<T>) -> Self {
        let key = controller.name().to_ascii_lowercase();
        self.endpoints.insert(key, Arc::new(controller));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Endpoint<P::Store>>> {
        self.endpoints.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
