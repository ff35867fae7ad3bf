//! PostgreSQL store: one pooled connection per store, staged mutations flushed in a transaction.

use super::{EntityStore, StoreProvider};
use crate::entity::{from_row, resolve_includes, stamp_created, stamp_modified, to_row, version_of, Entity};
use crate::error::AppError;
use crate::filter::Filter;
use crate::page::{Page, PageRequest};
use crate::sql::{self, quote_ident, PgBindValue, QueryBuf, TableSpec};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Connection, PgPool, Postgres, Row};
use std::str::FromStr;

/// Opens [`PgStore`]s from a shared pool. Tables are qualified with `schema` when set.
#[derive(Clone)]
pub struct PgStoreProvider {
    pool: PgPool,
    schema: Option<String>,
}

impl PgStoreProvider {
    pub fn new(pool: PgPool, schema: Option<String>) -> Self {
        PgStoreProvider { pool, schema }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StoreProvider for PgStoreProvider {
    type Store = PgStore;

    async fn open(&self) -> Result<PgStore, AppError> {
        let conn = self.pool.acquire().await?;
        Ok(PgStore {
            conn,
            schema: self.schema.clone(),
            pending: Vec::new(),
        })
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug)]
enum PendingOp {
    /// INSERT ... RETURNING; the returned row is handed back to the caller.
    Insert(QueryBuf),
    /// UPDATE or DELETE that must affect at least one row.
    Write { table: &'static str, id: i64, query: QueryBuf },
}

#[derive(Default)]
struct Flushed {
    affected: u64,
    returned: Vec<Value>,
}

/// Store over one pooled connection. The connection returns to the pool when the store drops.
pub struct PgStore {
    conn: PoolConnection<Postgres>,
    schema: Option<String>,
    pending: Vec<PendingOp>,
}

fn bind_all(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

impl PgStore {
    fn spec<T: Entity>(&self) -> TableSpec<'_> {
        TableSpec::of::<T>(self.schema.as_deref())
    }

    async fn query_many(&mut self, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(q).fetch_all(&mut *self.conn).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn select<T: Entity>(
        &mut self,
        filter: &Filter,
        includes: &[&str],
        page: Option<&PageRequest>,
    ) -> Result<Vec<T>, AppError> {
        filter.check_columns(T::table_name(), T::columns())?;
        let relations = resolve_includes::<T, _>(includes)?;
        let q = sql::select(&self.spec::<T>(), filter, &relations, page);
        self.query_many(&q).await?.into_iter().map(from_row).collect()
    }

    async fn flush(&mut self) -> Result<Flushed, AppError> {
        if self.pending.is_empty() {
            return Ok(Flushed::default());
        }
        let ops = std::mem::take(&mut self.pending);
        let mut out = Flushed::default();
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.conn.begin().await?;
        for op in &ops {
            match op {
                PendingOp::Insert(q) => {
                    tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
                    let row = bind_all(q).fetch_one(&mut *tx).await?;
                    out.returned.push(row_to_json(&row));
                    out.affected += 1;
                }
                PendingOp::Write { table, id, query } => {
                    tracing::debug!(sql = %query.sql, params = ?query.params, "query (tx)");
                    let result = bind_all(query).execute(&mut *tx).await?;
                    if result.rows_affected() == 0 {
                        return Err(AppError::Conflict(format!(
                            "{} {} was modified or deleted since it was loaded",
                            table, id
                        )));
                    }
                    out.affected += result.rows_affected();
                }
            }
        }
        tx.commit().await?;
        tracing::debug!(statements = ops.len(), affected = out.affected, "changes saved");
        Ok(out)
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn find<T: Entity>(&mut self, filter: &Filter, includes: &[&str]) -> Result<Option<T>, AppError> {
        let first = PageRequest::new(0, 1);
        Ok(self.select(filter, includes, Some(&first)).await?.into_iter().next())
    }

    async fn filter<T: Entity>(&mut self, filter: &Filter, includes: &[&str]) -> Result<Vec<T>, AppError> {
        self.select(filter, includes, None).await
    }

    async fn filter_paged<T: Entity>(
        &mut self,
        filter: &Filter,
        page: &PageRequest,
        includes: &[&str],
    ) -> Result<Page<T>, AppError> {
        let items = self.select(filter, includes, Some(page)).await?;
        let q = sql::count(&self.spec::<T>(), filter);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let total: i64 = bind_all(&q).fetch_one(&mut *self.conn).await?.try_get(0)?;
        Ok(Page::new(items, page, total.max(0) as u64))
    }

    async fn contains<T: Entity>(&mut self, filter: &Filter) -> Result<bool, AppError> {
        filter.check_columns(T::table_name(), T::columns())?;
        let q = sql::exists(&self.spec::<T>(), filter);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let found: bool = bind_all(&q).fetch_one(&mut *self.conn).await?.try_get(0)?;
        Ok(found)
    }

    async fn create<T: Entity>(&mut self, mut entity: T) -> Result<T, AppError> {
        stamp_created(&mut entity, chrono::Utc::now());
        let row = to_row(&entity)?;
        let q = sql::insert(&self.spec::<T>(), &row);
        self.pending.push(PendingOp::Insert(q));
        let created = self
            .flush()
            .await?
            .returned
            .pop()
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        from_row(created)
    }

    fn mark_modified<T: Entity>(&mut self, entity: &mut T) -> Result<(), AppError> {
        stamp_modified(entity, chrono::Utc::now());
        let row = to_row(&*entity)?;
        let version = version_of::<T>(&row)?;
        let id = entity.id();
        let query = sql::update(&self.spec::<T>(), &row, id, version)?;
        self.pending.push(PendingOp::Write {
            table: T::table_name(),
            id,
            query,
        });
        Ok(())
    }

    fn mark_deleted<T: Entity>(&mut self, entity: &T) -> Result<(), AppError> {
        let row = to_row(entity)?;
        let version = version_of::<T>(&row)?;
        let id = entity.id();
        let query = sql::delete(&self.spec::<T>(), id, version);
        self.pending.push(PendingOp::Write {
            table: T::table_name(),
            id,
            query,
        });
        Ok(())
    }

    async fn save_changes(&mut self) -> Result<u64, AppError> {
        Ok(self.flush().await?.affected)
    }

    async fn execute_procedure(&mut self, command: &str, params: &[Value]) -> Result<(), AppError> {
        let q = QueryBuf {
            sql: command.to_string(),
            params: params.to_vec(),
        };
        tracing::debug!(sql = %q.sql, params = ?q.params, "procedure");
        bind_all(&q).execute(&mut *self.conn).await?;
        Ok(())
    }
}

impl Drop for PgStore {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(discarded = self.pending.len(), "store dropped with unsaved changes");
        }
    }
}

/// Create the database named in `database_url` if it does not exist (connects to `postgres` first).
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let Some((admin, db_name)) = admin_target(database_url)? else {
        return Ok(());
    };
    let mut conn: sqlx::PgConnection = admin.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

/// Options for the `postgres` maintenance database plus the database to create.
/// `None` when the URL names no database or names `postgres` itself.
fn admin_target(database_url: &str) -> Result<Option<(PgConnectOptions, String)>, AppError> {
    let opts = PgConnectOptions::from_str(database_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let db_name = match opts.get_database() {
        Some(name) if !name.is_empty() && name != "postgres" => name.to_string(),
        _ => return Ok(None),
    };
    Ok(Some((opts.database("postgres"), db_name)))
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_target_switches_to_postgres_database() {
        let (admin, name) = admin_target("postgres://u:p@localhost:5432/conference?sslmode=disable")
            .unwrap()
            .unwrap();
        assert_eq!(name, "conference");
        assert_eq!(admin.get_database(), Some("postgres"));
        assert_eq!(admin.get_host(), "localhost");
        assert_eq!(admin.get_port(), 5432);
    }

    #[test]
    fn admin_target_keeps_query_paths_out_of_the_name() {
        let (admin, name) = admin_target("postgres://u@db.internal/app?sslrootcert=/etc/ssl/ca.pem")
            .unwrap()
            .unwrap();
        assert_eq!(name, "app");
        assert_eq!(admin.get_database(), Some("postgres"));
        assert_eq!(admin.get_host(), "db.internal");
    }

    #[test]
    fn admin_target_skips_urls_without_a_database() {
        assert!(admin_target("postgres://u:p@localhost:5432/postgres").unwrap().is_none());
        if std::env::var_os("PGDATABASE").is_none() {
            assert!(admin_target("postgres://localhost").unwrap().is_none());
        }
        assert!(matches!(admin_target("not a url"), Err(AppError::BadRequest(_))));
    }

    mod live {
        //! Run with `DATABASE_URL=... cargo test -- --ignored`.

        use super::super::*;
        use crate::migration::apply_sample_schema;
        use crate::models::Level;
        use sqlx::postgres::PgPoolOptions;

        async fn provider() -> Option<(PgStoreProvider, String)> {
            let url = std::env::var("DATABASE_URL").ok()?;
            let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.ok()?;
            let schema = format!("gateway_test_{}", uuid::Uuid::new_v4().simple());
            apply_sample_schema(&pool, Some(&schema)).await.unwrap();
            Some((PgStoreProvider::new(pool, Some(schema.clone())), schema))
        }

        async fn drop_schema(provider: &PgStoreProvider, schema: &str) {
            sqlx::query(&format!("DROP SCHEMA {} CASCADE", quote_ident(schema)))
                .execute(provider.pool())
                .await
                .unwrap();
        }

        fn level(id: i64, name: &str) -> Level {
            Level {
                id,
                name: name.into(),
                sessions: None,
            }
        }

        #[tokio::test]
        #[ignore = "needs DATABASE_URL"]
        async fn failed_flush_rolls_back_and_ids_stay_generated() {
            let Some((provider, schema)) = provider().await else {
                return;
            };
            let mut store = provider.open().await.unwrap();
            let a = store.create(level(42, "A")).await.unwrap();
            assert_eq!(a.id, 1);
            let b = store.create(level(0, "B")).await.unwrap();
            assert_eq!(b.id, 2);

            let mut other = provider.open().await.unwrap();
            assert_eq!(other.delete(&b).await.unwrap(), 1);

            store.mark_deleted(&a).unwrap();
            store.mark_deleted(&b).unwrap();
            assert!(matches!(store.save_changes().await, Err(AppError::Conflict(_))));
            assert!(store.contains::<Level>(&Filter::eq("id", a.id)).await.unwrap());

            let missing = level(99, "ghost");
            assert!(matches!(store.delete(&missing).await, Err(AppError::Conflict(_))));

            drop(store);
            drop(other);
            drop_schema(&provider, &schema).await;
        }
    }
}
