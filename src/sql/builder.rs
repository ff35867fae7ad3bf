//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from entity metadata.

use crate::entity::{Column, Entity, Relation, RelationKind};
use crate::error::AppError;
use crate::filter::Filter;
use crate::page::PageRequest;
use serde_json::{Map, Value};

const MAIN_ALIAS: &str = "main";

/// Table, id column and persisted columns of one entity, optionally schema-qualified.
#[derive(Clone, Copy, Debug)]
pub struct TableSpec<'a> {
    pub schema: Option<&'a str>,
    pub table: &'a str,
    pub id_column: &'a str,
    pub columns: &'a [Column],
}

impl<'a> TableSpec<'a> {
    pub fn of<T: Entity>(schema: Option<&'a str>) -> Self {
        TableSpec {
            schema,
            table: T::table_name(),
            id_column: T::id_column(),
            columns: T::columns(),
        }
    }

    pub fn related(rel: &'a Relation, schema: Option<&'a str>) -> Self {
        TableSpec {
            schema,
            table: rel.table,
            id_column: rel.id_column,
            columns: rel.columns,
        }
    }

    fn qualified(&self) -> String {
        match self.schema {
            Some(s) => format!("{}.{}", quote_ident(s), quote_ident(self.table)),
            None => quote_ident(self.table),
        }
    }

    fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn placeholder(&self, column: &str, n: u32) -> String {
        self.column(column)
            .and_then(|c| c.pg_type)
            .map(|t| format!("${}::{}", n, t))
            .unwrap_or_else(|| format!("${}", n))
    }
}

/// Quote an identifier for PostgreSQL. Embedded quotes are doubled.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Clone, Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// SELECT list: each column as-is, except numeric as col::text so it decodes without a decimal type.
fn select_column_list(spec: &TableSpec<'_>, alias: Option<&str>) -> String {
    spec.columns
        .iter()
        .map(|c| {
            let q = quote_ident(c.name);
            let expr = match alias {
                Some(a) => format!("{}.{}", a, q),
                None => q.clone(),
            };
            if c.pg_type == Some("numeric") {
                format!("{}::text AS {}", expr, q)
            } else if alias.is_some() {
                format!("{} AS {}", expr, q)
            } else {
                expr
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a filter as a boolean SQL expression over `alias`, binding values as parameters.
/// Columns must have been checked against the table beforehand.
pub fn render_filter(spec: &TableSpec<'_>, filter: &Filter, alias: &str, q: &mut QueryBuf) -> String {
    let col = |name: &str| format!("{}.{}", alias, quote_ident(name));
    match filter {
        Filter::True => "TRUE".to_string(),
        Filter::Compare { column, op, value } => {
            if value.is_null() {
                return match op {
                    crate::filter::CompareOp::Eq => format!("{} IS NULL", col(column)),
                    crate::filter::CompareOp::Ne => format!("{} IS NOT NULL", col(column)),
                    _ => "FALSE".to_string(),
                };
            }
            let n = q.push_param(value.clone());
            format!("{} {} {}", col(column), op.sql(), spec.placeholder(column, n))
        }
        Filter::In { column, values } => {
            if values.is_empty() {
                return "FALSE".to_string();
            }
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| {
                    let n = q.push_param(v.clone());
                    spec.placeholder(column, n)
                })
                .collect();
            format!("{} IN ({})", col(column), placeholders.join(", "))
        }
        Filter::IsNull(column) => format!("{} IS NULL", col(column)),
        Filter::And(parts) => join_parts(spec, parts, " AND ", "TRUE", alias, q),
        Filter::Or(parts) => join_parts(spec, parts, " OR ", "FALSE", alias, q),
        Filter::Not(inner) => format!("NOT ({})", render_filter(spec, inner, alias, q)),
    }
}

fn join_parts(
    spec: &TableSpec<'_>,
    parts: &[Filter],
    sep: &str,
    empty: &str,
    alias: &str,
    q: &mut QueryBuf,
) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    let rendered: Vec<String> = parts
        .iter()
        .map(|p| format!("({})", render_filter(spec, p, alias, q)))
        .collect();
    rendered.join(sep)
}

fn where_clause(spec: &TableSpec<'_>, filter: &Filter, q: &mut QueryBuf) -> String {
    match filter {
        Filter::True => String::new(),
        f => format!(" WHERE {}", render_filter(spec, f, MAIN_ALIAS, q)),
    }
}

/// One correlated subquery per include: row_to_json for to_one, json_agg for to_many.
fn include_subquery(rel: &Relation, schema: Option<&str>) -> String {
    let related = TableSpec::related(rel, schema);
    let rel_cols = select_column_list(&related, None);
    let sub_from = format!(
        "{} WHERE {} = {}.{}",
        related.qualified(),
        quote_ident(rel.remote_key),
        MAIN_ALIAS,
        quote_ident(rel.local_key)
    );
    match rel.kind {
        RelationKind::ToOne => format!(
            "(SELECT row_to_json(sub) FROM (SELECT {} FROM {} LIMIT 1) sub)",
            rel_cols, sub_from
        ),
        RelationKind::ToMany => format!(
            "(SELECT COALESCE(json_agg(row_to_json(sub) ORDER BY sub.{}), '[]'::json) FROM (SELECT {} FROM {}) sub)",
            quote_ident(related.id_column),
            rel_cols,
            sub_from
        ),
    }
}

/// SELECT with includes chained left to right, filter, ORDER BY id and optional paging.
pub fn select(spec: &TableSpec<'_>, filter: &Filter, includes: &[Relation], page: Option<&PageRequest>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut select_parts = vec![select_column_list(spec, Some(MAIN_ALIAS))];
    for rel in includes {
        select_parts.push(format!("{} AS {}", include_subquery(rel, spec.schema), quote_ident(&rel.field)));
    }
    let where_sql = where_clause(spec, filter, &mut q);
    let order_clause = format!(" ORDER BY {}.{}", MAIN_ALIAS, quote_ident(spec.id_column));
    let page_clause = page
        .map(|p| format!(" LIMIT {} OFFSET {}", p.limit(), p.offset()))
        .unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}",
        select_parts.join(", "),
        spec.qualified(),
        MAIN_ALIAS,
        where_sql,
        order_clause,
        page_clause
    );
    q
}

pub fn count(spec: &TableSpec<'_>, filter: &Filter) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(spec, filter, &mut q);
    q.sql = format!("SELECT COUNT(*) FROM {} {}{}", spec.qualified(), MAIN_ALIAS, where_sql);
    q
}

pub fn exists(spec: &TableSpec<'_>, filter: &Filter) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(spec, filter, &mut q);
    q.sql = format!("SELECT EXISTS(SELECT 1 FROM {} {}{})", spec.qualified(), MAIN_ALIAS, where_sql);
    q
}

/// INSERT every persisted column except the id, which the database generates.
pub fn insert(spec: &TableSpec<'_>, row: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in spec.columns {
        if c.name == spec.id_column {
            continue;
        }
        let val = row.get(c.name).cloned().unwrap_or(Value::Null);
        let n = q.push_param(val);
        cols.push(quote_ident(c.name));
        placeholders.push(spec.placeholder(c.name, n));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        spec.qualified(),
        cols.join(", "),
        placeholders.join(", "),
        select_column_list(spec, None)
    );
    q
}

/// Full-row UPDATE by id: every persisted column except the id, insert-only columns and the
/// version token. With a token, the row must still hold `expected` and the token is incremented.
pub fn update(
    spec: &TableSpec<'_>,
    row: &Map<String, Value>,
    id: i64,
    version: Option<(&str, i64)>,
) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let version_col = version.map(|(c, _)| c);
    let mut sets = Vec::new();
    for c in spec.columns {
        if c.name == spec.id_column || c.insert_only || Some(c.name) == version_col {
            continue;
        }
        let val = row.get(c.name).cloned().unwrap_or(Value::Null);
        let n = q.push_param(val);
        sets.push(format!("{} = {}", quote_ident(c.name), spec.placeholder(c.name, n)));
    }
    if let Some(vc) = version_col {
        sets.push(format!("{} = {} + 1", quote_ident(vc), quote_ident(vc)));
    }
    if sets.is_empty() {
        return Err(AppError::BadRequest(format!("{} has no updatable columns", spec.table)));
    }
    let id_param = q.push_param(Value::from(id));
    let mut where_sql = format!("{} = ${}", quote_ident(spec.id_column), id_param);
    if let Some((vc, expected)) = version {
        let n = q.push_param(Value::from(expected));
        where_sql.push_str(&format!(" AND {} = ${}", quote_ident(vc), n));
    }
    q.sql = format!("UPDATE {} SET {} WHERE {}", spec.qualified(), sets.join(", "), where_sql);
    Ok(q)
}

/// DELETE by id, guarded by the version token when the entity has one.
pub fn delete(spec: &TableSpec<'_>, id: i64, version: Option<(&str, i64)>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_param = q.push_param(Value::from(id));
    let mut where_sql = format!("{} = ${}", quote_ident(spec.id_column), id_param);
    if let Some((vc, expected)) = version {
        let n = q.push_param(Value::from(expected));
        where_sql.push_str(&format!(" AND {} = ${}", quote_ident(vc), n));
    }
    q.sql = format!("DELETE FROM {} WHERE {}", spec.qualified(), where_sql);
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{resolve_includes, to_row};
    use crate::models::{Level, Session, TimeSlot};
    use serde_json::json;

    #[test]
    fn select_chains_includes_left_to_right() {
        let spec = TableSpec::of::<Session>(Some("conf"));
        let includes = resolve_includes::<Session, _>(&["SessionType", "Location", "TimeSlot", "Level"]).unwrap();
        let q = select(&spec, &Filter::eq("id", 42), &includes, None);
        let positions: Vec<usize> = ["\"session_type\"", "\"location\"", "\"time_slot\"", "\"level\""]
            .iter()
            .map(|f| q.sql.find(&format!("AS {}", f)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(q.sql.contains("FROM \"conf\".\"session_types\" WHERE \"id\" = main.\"session_type_id\" LIMIT 1"));
        assert!(q.sql.ends_with("WHERE main.\"id\" = $1 ORDER BY main.\"id\""));
        assert_eq!(q.params, vec![json!(42)]);
    }

    #[test]
    fn to_many_include_aggregates() {
        let spec = TableSpec::of::<Level>(None);
        let includes = resolve_includes::<Level, _>(&["Sessions"]).unwrap();
        let q = select(&spec, &Filter::True, &includes, None);
        assert!(q.sql.contains("json_agg(row_to_json(sub) ORDER BY sub.\"id\")"));
        assert!(q.sql.contains("FROM \"sessions\" WHERE \"level_id\" = main.\"id\""));
        assert!(!q.sql.contains("WHERE TRUE"));
    }

    #[test]
    fn select_pages_with_limit_and_offset() {
        let spec = TableSpec::of::<Level>(None);
        let q = select(&spec, &Filter::gt("id", 3), &[], Some(&PageRequest::new(2, 10)));
        assert_eq!(
            q.sql,
            "SELECT main.\"id\" AS \"id\", main.\"name\" AS \"name\" FROM \"levels\" main WHERE main.\"id\" > $1 ORDER BY main.\"id\" LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn filters_render_nested_and_casts() {
        let spec = TableSpec::of::<TimeSlot>(None);
        let f = Filter::ge("starts_at", "2024-05-01T09:00:00Z")
            .and(Filter::is_in("id", [1, 2]).or(Filter::is_null("ends_at")).not());
        let mut q = QueryBuf::default();
        let sql = render_filter(&spec, &f, "main", &mut q);
        assert_eq!(
            sql,
            "(main.\"starts_at\" >= $1::timestamptz) AND (NOT ((main.\"id\" IN ($2, $3)) OR (main.\"ends_at\" IS NULL)))"
        );
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn null_comparisons_and_empty_in() {
        let spec = TableSpec::of::<Session>(None);
        let mut q = QueryBuf::default();
        assert_eq!(render_filter(&spec, &Filter::eq("description", Value::Null), "m", &mut q), "m.\"description\" IS NULL");
        assert_eq!(render_filter(&spec, &Filter::is_in("id", Vec::<i64>::new()), "m", &mut q), "FALSE");
        assert!(q.params.is_empty());
    }

    #[test]
    fn insert_never_binds_the_id() {
        let spec = TableSpec::of::<Level>(None);
        let row = to_row(&Level { id: 5, name: "Expert".into(), sessions: None }).unwrap();
        let q = insert(&spec, &row);
        assert_eq!(q.sql, "INSERT INTO \"levels\" (\"name\") VALUES ($1) RETURNING \"id\", \"name\"");
        assert_eq!(q.params, vec![json!("Expert")]);
    }

    #[test]
    fn update_overwrites_row_and_checks_version() {
        let spec = TableSpec::of::<Session>(None);
        let mut s = Session::new("Traits", 1, 2, 3, 4);
        s.id = 9;
        s.version = 5;
        let row = to_row(&s).unwrap();
        let q = update(&spec, &row, 9, Some(("version", 5))).unwrap();
        assert!(q.sql.starts_with("UPDATE \"sessions\" SET \"title\" = $1, \"description\" = $2"));
        assert!(!q.sql.contains("\"created_on\" ="));
        assert!(q.sql.contains("\"modified_on\" = $7::timestamptz"));
        assert!(q.sql.ends_with("\"version\" = \"version\" + 1 WHERE \"id\" = $8 AND \"version\" = $9"));
        assert_eq!(q.params[7], json!(9));
        assert_eq!(q.params[8], json!(5));
    }

    #[test]
    fn update_with_nothing_to_set_is_rejected() {
        let columns = [Column::new("id"), Column::new("created_on").insert_only()];
        let spec = TableSpec {
            schema: None,
            table: "audit_marks",
            id_column: "id",
            columns: &columns,
        };
        let row = json!({"id": 1, "created_on": "2024-05-01T09:00:00Z"}).as_object().cloned().unwrap();
        assert!(matches!(update(&spec, &row, 1, None), Err(AppError::BadRequest(_))));

        let q = update(&spec, &row, 1, Some(("version", 0))).unwrap();
        assert!(q.sql.starts_with("UPDATE \"audit_marks\" SET \"version\" = \"version\" + 1 WHERE"));
    }

    #[test]
    fn delete_by_id() {
        let spec = TableSpec::of::<Level>(Some("conf"));
        let q = delete(&spec, 3, None);
        assert_eq!(q.sql, "DELETE FROM \"conf\".\"levels\" WHERE \"id\" = $1");
        let q = delete(&TableSpec::of::<Session>(None), 3, Some(("version", 1)));
        assert_eq!(q.sql, "DELETE FROM \"sessions\" WHERE \"id\" = $1 AND \"version\" = $2");
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn count_and_exists() {
        let spec = TableSpec::of::<Level>(None);
        assert_eq!(count(&spec, &Filter::True).sql, "SELECT COUNT(*) FROM \"levels\" main");
        let q = exists(&spec, &Filter::eq("name", "Intro"));
        assert_eq!(q.sql, "SELECT EXISTS(SELECT 1 FROM \"levels\" main WHERE main.\"name\" = $1)");
    }
}
