//! Entity metadata: the id-bearing record contract every store and controller is generic over.

use crate::case::to_snake_case;
use crate::error::AppError;
use crate::service::ModelState;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// One persisted column of an entity table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    /// PostgreSQL type used to cast bound parameters (e.g. `timestamptz`). None binds as-is.
    pub pg_type: Option<&'static str>,
    /// Written on insert only; a full-row update leaves it untouched.
    pub insert_only: bool,
}

impl Column {
    pub const fn new(name: &'static str) -> Self {
        Column {
            name,
            pg_type: None,
            insert_only: false,
        }
    }

    pub const fn cast(self, pg_type: &'static str) -> Self {
        Column {
            pg_type: Some(pg_type),
            ..self
        }
    }

    pub const fn insert_only(self) -> Self {
        Column {
            insert_only: true,
            ..self
        }
    }
}

/// Entity carries a creation timestamp assigned by the store on create.
pub trait CreatedOn {
    fn set_created_on(&mut self, at: DateTime<Utc>);
}

/// Entity carries a modification timestamp refreshed by the store on create and update.
pub trait ModifiedOn {
    fn set_modified_on(&mut self, at: DateTime<Utc>);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    ToOne,
    ToMany,
}

/// An eager-loadable association. A target row belongs to an owner when
/// `target[remote_key] == owner[local_key]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    /// Include name as requested by callers, e.g. "SessionType".
    pub name: &'static str,
    /// JSON field the loaded value is written to.
    pub field: String,
    pub kind: RelationKind,
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [Column],
    pub local_key: &'static str,
    pub remote_key: &'static str,
}

impl Relation {
    /// Owner holds a foreign key (`local_key`) to the target's id.
    pub fn to_one<R: Entity>(name: &'static str, local_key: &'static str) -> Self {
        Relation {
            name,
            field: to_snake_case(name),
            kind: RelationKind::ToOne,
            table: R::table_name(),
            id_column: R::id_column(),
            columns: R::columns(),
            local_key,
            remote_key: R::id_column(),
        }
    }

    /// Target rows hold a foreign key (`remote_key`) to the owner's id.
    pub fn to_many<O: Entity, R: Entity>(name: &'static str, remote_key: &'static str) -> Self {
        Relation {
            name,
            field: to_snake_case(name),
            kind: RelationKind::ToMany,
            table: R::table_name(),
            id_column: R::id_column(),
            columns: R::columns(),
            local_key: O::id_column(),
            remote_key,
        }
    }
}

/// A uniquely identified domain record persisted in the store.
///
/// JSON keys of the serialized entity must equal its column names. Relation
/// fields are extra keys that are never written back.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn table_name() -> &'static str;

    fn id_column() -> &'static str {
        "id"
    }

    /// Persisted columns, id included.
    fn columns() -> &'static [Column];

    fn relations() -> Vec<Relation> {
        Vec::new()
    }

    fn id(&self) -> i64;

    /// Integer column used as optimistic-concurrency token, if any.
    fn version_column() -> Option<&'static str> {
        None
    }

    fn as_created_on(&mut self) -> Option<&mut dyn CreatedOn> {
        None
    }

    fn as_modified_on(&mut self) -> Option<&mut dyn ModifiedOn> {
        None
    }

    /// Entity-level rules run after a request body binds successfully.
    fn validate(&self, _state: &mut ModelState) {}
}

/// Stamp creation and modification timestamps where the entity supports them.
pub fn stamp_created<T: Entity>(entity: &mut T, now: DateTime<Utc>) {
    if let Some(c) = entity.as_created_on() {
        c.set_created_on(now);
    }
    if let Some(m) = entity.as_modified_on() {
        m.set_modified_on(now);
    }
}

pub fn stamp_modified<T: Entity>(entity: &mut T, now: DateTime<Utc>) {
    if let Some(m) = entity.as_modified_on() {
        m.set_modified_on(now);
    }
}

/// Serialize an entity and keep only its persisted columns. Missing columns become null.
pub fn to_row<T: Entity>(entity: &T) -> Result<Map<String, Value>, AppError> {
    let mut full = match serde_json::to_value(entity)? {
        Value::Object(m) => m,
        _ => {
            return Err(AppError::BadRequest(format!(
                "{} must serialize to a JSON object",
                T::table_name()
            )))
        }
    };
    let mut row = Map::new();
    for c in T::columns() {
        row.insert(c.name.to_string(), full.remove(c.name).unwrap_or(Value::Null));
    }
    Ok(row)
}

pub fn from_row<T: Entity>(row: Value) -> Result<T, AppError> {
    Ok(serde_json::from_value(row)?)
}

/// Id column value of a row, if it is an integer.
pub fn row_id<T: Entity>(row: &Map<String, Value>) -> Option<i64> {
    row.get(T::id_column()).and_then(Value::as_i64)
}

/// Resolve include names against the entity's relations, in request order. Duplicates are dropped.
pub fn resolve_includes<T: Entity, S: AsRef<str>>(includes: &[S]) -> Result<Vec<Relation>, AppError> {
    let relations = T::relations();
    let mut out: Vec<Relation> = Vec::with_capacity(includes.len());
    for name in includes {
        let name = name.as_ref();
        if out.iter().any(|r| r.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        let rel = relations
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                AppError::BadRequest(format!("unknown include '{}' for {}", name, T::table_name()))
            })?;
        out.push(rel.clone());
    }
    Ok(out)
}

/// Version token column and its current value in a row.
pub fn version_of<T: Entity>(row: &Map<String, Value>) -> Result<Option<(&'static str, i64)>, AppError> {
    let Some(col) = T::version_column() else {
        return Ok(None);
    };
    let v = row.get(col).and_then(Value::as_i64).ok_or_else(|| {
        AppError::BadRequest(format!("{} requires an integer '{}' token", T::table_name(), col))
    })?;
    Ok(Some((col, v)))
}

/// An update needs at least one column it may overwrite, or a version token to bump.
pub fn ensure_updatable<T: Entity>() -> Result<(), AppError> {
    let writable = T::columns().iter().any(|c| !c.insert_only && c.name != T::id_column());
    if writable || T::version_column().is_some() {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("{} has no updatable columns", T::table_name())))
    }
}

/// Write the bumped version token back into the caller's entity.
pub fn bump_version<T: Entity>(entity: &mut T) -> Result<(), AppError> {
    let Some(col) = T::version_column() else {
        return Ok(());
    };
    let mut full = serde_json::to_value(&*entity)?;
    if let Some(obj) = full.as_object_mut() {
        let next = obj.get(col).and_then(Value::as_i64).unwrap_or(0) + 1;
        obj.insert(col.to_string(), Value::from(next));
    }
    *entity = serde_json::from_value(full)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Level, Session};

    #[test]
    fn to_row_drops_relation_fields() {
        let mut s = Session::new("Rust ownership", 1, 1, 1, 1);
        s.level = Some(Level { id: 1, name: "Intro".into(), sessions: None });
        let row = to_row(&s).unwrap();
        assert!(!row.contains_key("level"));
        assert_eq!(row.len(), Session::columns().len());
        assert_eq!(row["title"], "Rust ownership");
    }

    #[test]
    fn includes_resolve_in_order_without_duplicates() {
        let rels = resolve_includes::<Session, _>(&["Level", "SessionType", "level"]).unwrap();
        let names: Vec<_> = rels.iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Level", "SessionType"]);
        assert_eq!(rels[1].field, "session_type");
    }

    #[test]
    fn unknown_include_is_rejected() {
        let err = resolve_includes::<Session, _>(&["Speaker"]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn stamping_respects_capabilities() {
        let now = Utc::now();
        let mut s = Session::new("x", 1, 1, 1, 1);
        stamp_created(&mut s, now);
        assert_eq!(s.created_on, Some(now));
        assert_eq!(s.modified_on, Some(now));

        let mut l = Level { id: 0, name: "Advanced".into(), sessions: None };
        stamp_created(&mut l, now);
        assert_eq!(l.name, "Advanced");
    }

    #[test]
    fn bump_version_increments_token() {
        let mut s = Session::new("x", 1, 1, 1, 1);
        s.version = 3;
        bump_version(&mut s).unwrap();
        assert_eq!(s.version, 4);
    }
}
