//! In-memory store with the same semantics as the PostgreSQL one: id-ordered reads,
//! staged mutations applied all-or-nothing, version-token conflicts.

use super::{EntityStore, StoreProvider};
use crate::entity::{
    ensure_updatable, from_row, resolve_includes, row_id, stamp_created, stamp_modified, to_row, version_of, Entity,
    Relation, RelationKind,
};
use crate::error::AppError;
use crate::filter::{compare_values, Filter};
use crate::page::{Page, PageRequest};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Row = Map<String, Value>;

#[derive(Clone, Debug, Default)]
struct Table {
    rows: BTreeMap<i64, Row>,
    last_id: i64,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    by_name: HashMap<&'static str, Table>,
}

impl Tables {
    fn rows(&self, table: &str) -> impl Iterator<Item = &Row> {
        self.by_name.get(table).into_iter().flat_map(|t| t.rows.values())
    }
}

/// Shared in-memory database. Cloning shares the same tables.
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        MemoryDb::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of rows currently stored for an entity type.
    pub fn row_count<T: Entity>(&self) -> usize {
        self.lock()
            .by_name
            .get(T::table_name())
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn store(&self) -> MemoryStore {
        MemoryStore {
            db: self.clone(),
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl StoreProvider for MemoryDb {
    type Store = MemoryStore;

    async fn open(&self) -> Result<MemoryStore, AppError> {
        Ok(self.store())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Debug)]
enum PendingOp {
    Insert {
        table: &'static str,
        row: Row,
        id_column: &'static str,
    },
    Update {
        table: &'static str,
        id: i64,
        row: Row,
        version: Option<(&'static str, i64)>,
        skip: Vec<&'static str>,
    },
    Delete {
        table: &'static str,
        id: i64,
        version: Option<(&'static str, i64)>,
    },
}

#[derive(Default)]
struct Flushed {
    affected: u64,
    returned: Vec<Row>,
}

/// One unit of work over a [`MemoryDb`].
pub struct MemoryStore {
    db: MemoryDb,
    pending: Vec<PendingOp>,
}

fn conflict(table: &str, id: i64) -> AppError {
    AppError::Conflict(format!("{} {} was modified or deleted since it was loaded", table, id))
}

fn version_matches(row: &Row, version: Option<(&str, i64)>) -> bool {
    match version {
        Some((col, expected)) => row.get(col).and_then(Value::as_i64) == Some(expected),
        None => true,
    }
}

/// Attach each include to a copy of the row, in request order.
fn load_includes(tables: &Tables, row: &Row, relations: &[Relation]) -> Row {
    let mut out = row.clone();
    for rel in relations {
        let key = row.get(rel.local_key).unwrap_or(&Value::Null);
        let mut related = tables
            .rows(rel.table)
            .filter(|r| compare_values(r.get(rel.remote_key).unwrap_or(&Value::Null), key) == Some(Ordering::Equal));
        let value = match rel.kind {
            RelationKind::ToOne => related.next().cloned().map(Value::Object).unwrap_or(Value::Null),
            RelationKind::ToMany => Value::Array(related.cloned().map(Value::Object).collect()),
        };
        out.insert(rel.field.clone(), value);
    }
    out
}

impl MemoryStore {
    fn select<T: Entity>(
        &self,
        filter: &Filter,
        includes: &[&str],
        page: Option<&PageRequest>,
    ) -> Result<(Vec<T>, u64), AppError> {
        filter.check_columns(T::table_name(), T::columns())?;
        let relations = resolve_includes::<T, _>(includes)?;
        let tables = self.db.lock();
        let matches: Vec<&Row> = tables.rows(T::table_name()).filter(|r| filter.matches(r)).collect();
        let total = matches.len() as u64;
        let (skip, take) = match page {
            Some(p) => (p.offset() as usize, p.limit() as usize),
            None => (0, usize::MAX),
        };
        let items = matches
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|r| from_row(Value::Object(load_includes(&tables, r, &relations))))
            .collect::<Result<Vec<T>, _>>()?;
        Ok((items, total))
    }

    /// Apply staged ops to a copy of the tables and swap it in only if all succeed.
    fn flush(&mut self) -> Result<Flushed, AppError> {
        if self.pending.is_empty() {
            return Ok(Flushed::default());
        }
        let ops = std::mem::take(&mut self.pending);
        let mut guard = self.db.lock();
        let mut work = guard.clone();
        let mut out = Flushed::default();
        for op in ops {
            match op {
                PendingOp::Insert { table, mut row, id_column } => {
                    let t = work.by_name.entry(table).or_default();
                    t.last_id += 1;
                    let id = t.last_id;
                    row.insert(id_column.to_string(), Value::from(id));
                    t.rows.insert(id, row.clone());
                    out.returned.push(row);
                    out.affected += 1;
                }
                PendingOp::Update {
                    table,
                    id,
                    row,
                    version,
                    skip,
                } => {
                    let current = work
                        .by_name
                        .get_mut(table)
                        .and_then(|t| t.rows.get_mut(&id))
                        .filter(|r| version_matches(r, version))
                        .ok_or_else(|| conflict(table, id))?;
                    for (k, v) in row {
                        if !skip.contains(&k.as_str()) {
                            current.insert(k, v);
                        }
                    }
                    if let Some((col, expected)) = version {
                        current.insert(col.to_string(), Value::from(expected + 1));
                    }
                    out.affected += 1;
                }
                PendingOp::Delete { table, id, version } => {
                    let t = work.by_name.get_mut(table).ok_or_else(|| conflict(table, id))?;
                    match t.rows.get(&id) {
                        Some(r) if version_matches(r, version) => {
                            t.rows.remove(&id);
                        }
                        _ => return Err(conflict(table, id)),
                    }
                    out.affected += 1;
                }
            }
        }
        *guard = work;
        tracing::debug!(affected = out.affected, "changes saved");
        Ok(out)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn find<T: Entity>(&mut self, filter: &Filter, includes: &[&str]) -> Result<Option<T>, AppError> {
        let first = PageRequest::new(0, 1);
        Ok(self.select(filter, includes, Some(&first))?.0.into_iter().next())
    }

    async fn filter<T: Entity>(&mut self, filter: &Filter, includes: &[&str]) -> Result<Vec<T>, AppError> {
        Ok(self.select(filter, includes, None)?.0)
    }

    async fn filter_paged<T: Entity>(
        &mut self,
        filter: &Filter,
        page: &PageRequest,
        includes: &[&str],
    ) -> Result<Page<T>, AppError> {
        let (items, total) = self.select(filter, includes, Some(page))?;
        Ok(Page::new(items, page, total))
    }

    async fn contains<T: Entity>(&mut self, filter: &Filter) -> Result<bool, AppError> {
        filter.check_columns(T::table_name(), T::columns())?;
        let tables = self.db.lock();
        let found = tables.rows(T::table_name()).any(|r| filter.matches(r));
        Ok(found)
    }

    async fn create<T: Entity>(&mut self, mut entity: T) -> Result<T, AppError> {
        stamp_created(&mut entity, chrono::Utc::now());
        let row = to_row(&entity)?;
        self.pending.push(PendingOp::Insert {
            table: T::table_name(),
            row,
            id_column: T::id_column(),
        });
        let created = self
            .flush()?
            .returned
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("{} row after insert", T::table_name())))?;
        from_row(Value::Object(created))
    }

    fn mark_modified<T: Entity>(&mut self, entity: &mut T) -> Result<(), AppError> {
        ensure_updatable::<T>()?;
        stamp_modified(entity, chrono::Utc::now());
        let row = to_row(&*entity)?;
        let version = version_of::<T>(&row)?;
        let id = row_id::<T>(&row).unwrap_or_else(|| entity.id());
        let mut skip: Vec<&'static str> = T::columns().iter().filter(|c| c.insert_only).map(|c| c.name).collect();
        skip.push(T::id_column());
        self.pending.push(PendingOp::Update {
            table: T::table_name(),
            id,
            row,
            version,
            skip,
        });
        Ok(())
    }

    fn mark_deleted<T: Entity>(&mut self, entity: &T) -> Result<(), AppError> {
        let row = to_row(entity)?;
        self.pending.push(PendingOp::Delete {
            table: T::table_name(),
            id: entity.id(),
            version: version_of::<T>(&row)?,
        });
        Ok(())
    }

    async fn save_changes(&mut self) -> Result<u64, AppError> {
        Ok(self.flush()?.affected)
    }

    async fn execute_procedure(&mut self, command: &str, _params: &[Value]) -> Result<(), AppError> {
        Err(AppError::Unsupported(format!(
            "the in-memory store cannot execute raw commands ({})",
            command
        )))
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(discarded = self.pending.len(), "store dropped with unsaved changes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Level, Location, Session, SessionType, TimeSlot};
    use chrono::{TimeZone, Utc};

    fn level(name: &str) -> Level {
        Level {
            id: 0,
            name: name.into(),
            sessions: None,
        }
    }

    async fn seed(store: &mut MemoryStore) -> Session {
        let st = store.create(SessionType { id: 0, name: "Talk".into() }).await.unwrap();
        let loc = store
            .create(Location { id: 0, name: "Hall A".into(), capacity: Some(300) })
            .await
            .unwrap();
        let slot = store
            .create(TimeSlot {
                id: 0,
                starts_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
                ends_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            })
            .await
            .unwrap();
        let lvl = store.create(level("Intro")).await.unwrap();
        store
            .create(Session::new("Ownership", st.id, loc.id, slot.id, lvl.id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let db = MemoryDb::new();
        let mut store = db.store();
        let a = store.create(level("A")).await.unwrap();
        let b = store.create(level("B")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let s = seed(&mut store).await;
        assert!(s.created_on.is_some());
        assert_eq!(s.created_on, s.modified_on);

        let found: Session = store.find(&Filter::eq("id", s.id), &[]).await.unwrap().unwrap();
        assert_eq!(found.title, "Ownership");
        assert_eq!(found.created_on, s.created_on);
    }

    #[tokio::test]
    async fn find_missing_is_none() {
        let mut store = MemoryDb::new().store();
        let found: Option<Level> = store.find(&Filter::eq("id", 99), &[]).await.unwrap();
        assert!(found.is_none());
        let got: Option<Level> = store.get(&Filter::eq("id", 99), &[]).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn includes_are_loaded() {
        let db = MemoryDb::new();
        let mut store = db.store();
        let s = seed(&mut store).await;
        let loaded: Session = store
            .find(&Filter::eq("id", s.id), &["SessionType", "Location", "TimeSlot", "Level"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.session_type.unwrap().name, "Talk");
        assert_eq!(loaded.location.unwrap().capacity, Some(300));
        assert!(loaded.time_slot.is_some());
        assert_eq!(loaded.level.unwrap().name, "Intro");

        let levels: Vec<Level> = store.all(&["Sessions"]).await.unwrap();
        assert_eq!(levels[0].sessions.as_ref().map(Vec::len), Some(1));

        let bare: Session = store.find(&Filter::eq("id", s.id), &[]).await.unwrap().unwrap();
        assert!(bare.level.is_none());
    }

    #[tokio::test]
    async fn update_bumps_version_and_rejects_stale_token() {
        let db = MemoryDb::new();
        let mut store = db.store();
        let mut s = seed(&mut store).await;
        let stale = s.clone();
        let created_on = s.created_on;

        s.title = "Ownership & Borrowing".into();
        s.created_on = None;
        assert_eq!(store.update(&mut s).await.unwrap(), 1);
        assert_eq!(s.version, 1);

        let mut stale = stale;
        stale.title = "Lost update".into();
        let err = store.update(&mut stale).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let current: Session = store.find(&Filter::eq("id", s.id), &[]).await.unwrap().unwrap();
        assert_eq!(current.title, "Ownership & Borrowing");
        assert_eq!(current.version, 1);
        assert_eq!(current.created_on, created_on);
    }

    #[tokio::test]
    async fn update_of_missing_row_conflicts() {
        let mut store = MemoryDb::new().store();
        let mut ghost = Level {
            id: 7,
            name: "Ghost".into(),
            sessions: None,
        };
        assert!(matches!(store.update(&mut ghost).await, Err(AppError::Conflict(_))));
    }

    #[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
    struct Mark {
        #[serde(default)]
        id: i64,
        #[serde(default)]
        created_on: Option<chrono::DateTime<Utc>>,
    }

    impl Entity for Mark {
        fn table_name() -> &'static str {
            "marks"
        }

        fn columns() -> &'static [crate::entity::Column] {
            const COLUMNS: &[crate::entity::Column] = &[
                crate::entity::Column::new("id"),
                crate::entity::Column::new("created_on").insert_only(),
            ];
            COLUMNS
        }

        fn id(&self) -> i64 {
            self.id
        }
    }

    #[tokio::test]
    async fn update_without_writable_columns_is_rejected() {
        let db = MemoryDb::new();
        let mut store = db.store();
        let mut mark = store.create(Mark { id: 0, created_on: None }).await.unwrap();
        assert!(matches!(store.update(&mut mark).await, Err(AppError::BadRequest(_))));
        assert_eq!(db.row_count::<Mark>(), 1);
    }

    #[tokio::test]
    async fn delete_where_removes_exactly_the_matches() {
        let db = MemoryDb::new();
        let mut store = db.store();
        for name in ["Intro", "Intermediate", "Advanced", "Expert"] {
            store.create(level(name)).await.unwrap();
        }
        let removed = store.delete_where::<Level>(&Filter::ge("name", "F")).await.unwrap();
        assert_eq!(removed, 2);
        let left: Vec<Level> = store.all(&[]).await.unwrap();
        let names: Vec<_> = left.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Advanced", "Expert"]);
        assert_eq!(store.delete_where::<Level>(&Filter::eq("name", "none")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn negated_predicate_skips_null_cells() {
        let db = MemoryDb::new();
        let mut store = db.store();
        let first = seed(&mut store).await;
        let mut described = Session::new(
            "Lifetimes",
            first.session_type_id,
            first.location_id,
            first.time_slot_id,
            first.level_id,
        );
        described.description = Some("deep dive".into());
        store.create(described).await.unwrap();

        let not_x = Filter::eq("description", "x").not();
        assert_eq!(store.delete_where::<Session>(&not_x).await.unwrap(), 1);
        let left: Vec<Session> = store.all(&[]).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, first.id);
        assert_eq!(
            store.delete_where::<Session>(&Filter::is_in("description", ["x"]).not()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn failed_flush_rolls_back_every_staged_delete() {
        let db = MemoryDb::new();
        let mut store = db.store();
        let a = store.create(level("A")).await.unwrap();
        let b = store.create(level("B")).await.unwrap();

        let mut other = db.store();
        other.delete(&b).await.unwrap();

        store.mark_deleted(&a).unwrap();
        store.mark_deleted(&b).unwrap();
        assert!(matches!(store.save_changes().await, Err(AppError::Conflict(_))));
        assert_eq!(db.row_count::<Level>(), 1);
        assert!(store.contains::<Level>(&Filter::eq("id", a.id)).await.unwrap());
    }

    #[tokio::test]
    async fn paging_is_stable_and_total_counts_all_matches() {
        let db = MemoryDb::new();
        let mut store = db.store();
        for i in 0..7 {
            store.create(level(&format!("L{}", i))).await.unwrap();
        }
        let page: Page<Level> = store
            .filter_paged(&Filter::gt("id", 1), &PageRequest::new(1, 4), &[])
            .await
            .unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.total_pages, 2);
        let ids: Vec<_> = page.items.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![6, 7]);

        let first: Page<Level> = store
            .filter_paged(&Filter::True, &PageRequest::new(0, 3), &[])
            .await
            .unwrap();
        assert!(first.items.len() <= 3);
    }

    #[tokio::test]
    async fn contains_and_unknown_columns() {
        let mut store = MemoryDb::new().store();
        store.create(level("Intro")).await.unwrap();
        assert!(store.contains::<Level>(&Filter::eq("name", "Intro")).await.unwrap());
        assert!(!store.contains::<Level>(&Filter::eq("name", "Other")).await.unwrap());
        assert!(matches!(
            store.contains::<Level>(&Filter::eq("title", "x")).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn create_ignores_a_client_supplied_id() {
        let mut store = MemoryDb::new().store();
        let first = store
            .create(Level { id: 5, name: "Five".into(), sessions: None })
            .await
            .unwrap();
        assert_eq!(first.id, 1);
        for expected in 2..=5 {
            assert_eq!(store.create(level("next")).await.unwrap().id, expected);
        }
        let again = store
            .create(Level { id: 1, name: "One again".into(), sessions: None })
            .await
            .unwrap();
        assert_eq!(again.id, 6);
        assert_eq!(store.all::<Level>(&[]).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn raw_commands_are_unsupported() {
        let mut store = MemoryDb::new().store();
        let err = store.execute_procedure("CALL refresh_stats()", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::Unsupported(_)));
    }
}
