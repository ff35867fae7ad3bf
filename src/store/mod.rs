//! Entity store adapter: the generic data-access contract between controllers and a
//! change-tracked backing store. One store instance serves one request.

mod memory;
mod postgres;

pub use memory::{MemoryDb, MemoryStore};
pub use postgres::{ensure_database_exists, PgStore, PgStoreProvider};

use crate::entity::Entity;
use crate::error::AppError;
use crate::filter::Filter;
use crate::page::{Page, PageRequest};
use async_trait::async_trait;
use serde_json::Value;

/// Typed query and mutation operations over any [`Entity`].
///
/// `update` and `delete` stage a mutation and flush it through [`EntityStore::save_changes`];
/// a flush applies every staged mutation in one transaction or none of them.
#[async_trait]
pub trait EntityStore: Send {
    /// Every record, with `includes` eager-loaded.
    async fn all<T: Entity>(&mut self, includes: &[&str]) -> Result<Vec<T>, AppError> {
        self.filter(&Filter::True, includes).await
    }

    async fn get<T: Entity>(&mut self, filter: &Filter, includes: &[&str]) -> Result<Option<T>, AppError> {
        self.find(filter, includes).await
    }

    /// First match in id order. No match is `Ok(None)`.
    async fn find<T: Entity>(&mut self, filter: &Filter, includes: &[&str]) -> Result<Option<T>, AppError>;

    async fn filter<T: Entity>(&mut self, filter: &Filter, includes: &[&str]) -> Result<Vec<T>, AppError>;

    /// One page of matches in id order; `total` counts all matches.
    async fn filter_paged<T: Entity>(
        &mut self,
        filter: &Filter,
        page: &PageRequest,
        includes: &[&str],
    ) -> Result<Page<T>, AppError>;

    async fn contains<T: Entity>(&mut self, filter: &Filter) -> Result<bool, AppError>;

    /// Stamp timestamps, persist, and return the stored entity with its generated id.
    async fn create<T: Entity>(&mut self, entity: T) -> Result<T, AppError>;

    /// Stage a full-row overwrite; refreshes the modified timestamp.
    fn mark_modified<T: Entity>(&mut self, entity: &mut T) -> Result<(), AppError>;

    fn mark_deleted<T: Entity>(&mut self, entity: &T) -> Result<(), AppError>;

    /// Flush staged mutations; returns affected rows. A mutation that affects no row is a
    /// concurrency conflict and rolls back the whole flush.
    async fn save_changes(&mut self) -> Result<u64, AppError>;

    async fn update<T: Entity>(&mut self, entity: &mut T) -> Result<u64, AppError> {
        self.mark_modified(entity)?;
        let affected = self.save_changes().await?;
        crate::entity::bump_version(entity)?;
        Ok(affected)
    }

    async fn delete<T: Entity>(&mut self, entity: &T) -> Result<u64, AppError> {
        self.mark_deleted(entity)?;
        self.save_changes().await
    }

    /// Materialize the matches, then delete each one in a single flush.
    async fn delete_where<T: Entity>(&mut self, filter: &Filter) -> Result<u64, AppError> {
        let matches: Vec<T> = self.filter(filter, &[]).await?;
        if matches.is_empty() {
            return Ok(0);
        }
        for entity in &matches {
            self.mark_deleted(entity)?;
        }
        self.save_changes().await
    }

    /// Raw parameterized command passthrough.
    async fn execute_procedure(&mut self, command: &str, params: &[Value]) -> Result<(), AppError>;
}

/// Opens one store per request.
#[async_trait]
pub trait StoreProvider: Clone + Send + Sync + 'static {
    type Store: EntityStore;

    async fn open(&self) -> Result<Self::Store, AppError>;

    /// Readiness check.
    async fn ping(&self) -> Result<(), AppError>;
}
