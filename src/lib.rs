//! CRUD gateway: generic REST controllers over an entity store, dispatched through a convention route table.

pub mod case;
pub mod config;
pub mod controller;
pub mod entity;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod migration;
pub mod models;
pub mod page;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::GatewayConfig;
pub use controller::Controller;
pub use entity::{Column, CreatedOn, Entity, ModifiedOn, Relation, RelationKind};
pub use error::{AppError, ConfigError};
pub use filter::Filter;
pub use handlers::{ActionCall, ControllerRegistry, Endpoint};
pub use migration::apply_sample_schema;
pub use page::{Page, PageRequest};
pub use routes::{api_routes, app, common_routes, common_routes_with_ready, RouteTable};
pub use service::{bind_model, ModelState};
pub use state::AppState;
pub use store::{ensure_database_exists, EntityStore, MemoryDb, MemoryStore, PgStore, PgStoreProvider, StoreProvider};
