//! Generic controller: maps the conventional CRUD actions onto an [`EntityStore`] for one entity type.

use crate::entity::Entity;
use crate::error::AppError;
use crate::filter::Filter;
use crate::page::{Page, PageRequest};
use crate::store::EntityStore;
use std::marker::PhantomData;

/// CRUD actions for `T`, with a fixed list of relations eager-loaded on reads.
pub struct Controller<T> {
    name: String,
    includes: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Controller<T> {
    fn clone(&self) -> Self {
        Controller {
            name: self.name.clone(),
            includes: self.includes.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> Controller<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Controller {
            name: name.into(),
            includes: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes = includes.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    fn include_refs(&self) -> Vec<&str> {
        self.includes.iter().map(String::as_str).collect()
    }

    fn by_id(id: i64) -> Filter {
        Filter::eq(T::id_column(), id)
    }

    pub async fn get_all<S: EntityStore>(&self, store: &mut S) -> Result<Vec<T>, AppError> {
        store.all(&self.include_refs()).await
    }

    pub async fn get<S: EntityStore>(&self, store: &mut S, id: i64) -> Result<Option<T>, AppError> {
        store.find(&Self::by_id(id), &self.include_refs()).await
    }

    /// Overwrite an existing record. Returns affected rows.
    pub async fn post<S: EntityStore>(&self, store: &mut S, mut value: T) -> Result<u64, AppError> {
        store.update(&mut value).await
    }

    /// Insert a new record and return it as stored.
    pub async fn put<S: EntityStore>(&self, store: &mut S, value: T) -> Result<T, AppError> {
        store.create(value).await
    }

    pub async fn delete<S: EntityStore>(&self, store: &mut S, id: i64) -> Result<u64, AppError> {
        store.delete_where::<T>(&Self::by_id(id)).await
    }

    pub async fn delete_value<S: EntityStore>(&self, store: &mut S, value: &T) -> Result<u64, AppError> {
        self.delete(store, value.id()).await
    }

    pub async fn page<S: EntityStore>(&self, store: &mut S, page: &PageRequest) -> Result<Page<T>, AppError> {
        store.filter_paged(&Filter::True, page, &self.include_refs()).await
    }
}
