//! Filter predicates over entity rows. A filter is plain data: it renders to a SQL
//! WHERE clause for PostgreSQL and evaluates directly against JSON rows in memory.

use crate::entity::Column;
use crate::error::AppError;
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Matches every row.
    True,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    IsNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull(column.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::True => other,
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            this => Filter::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            this => Filter::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Every column name the filter references, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::True => {}
            Filter::Compare { column, .. } | Filter::In { column, .. } | Filter::IsNull(column) => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            Filter::And(parts) | Filter::Or(parts) => parts.iter().for_each(|p| p.collect_columns(out)),
            Filter::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Reject filters naming columns outside the entity's persisted set.
    pub fn check_columns(&self, table: &str, columns: &[Column]) -> Result<(), AppError> {
        for name in self.columns() {
            if !columns.iter().any(|c| c.name == name) {
                return Err(AppError::BadRequest(format!("unknown filter column '{}' on {}", name, table)));
            }
        }
        Ok(())
    }

    /// Evaluate against a JSON row with SQL null semantics. A row matches only when the
    /// predicate is true; unknown (any comparison touching a null cell) excludes it, also under `Not`.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        self.eval(row) == Some(true)
    }

    /// Three-valued evaluation; `None` is SQL's UNKNOWN.
    fn eval(&self, row: &Map<String, Value>) -> Option<bool> {
        match self {
            Filter::True => Some(true),
            Filter::Compare { column, op, value } => {
                let cell = row.get(column).unwrap_or(&Value::Null);
                match (value.is_null(), op) {
                    (true, CompareOp::Eq) => Some(cell.is_null()),
                    (true, CompareOp::Ne) => Some(!cell.is_null()),
                    (true, _) => Some(false),
                    (false, _) => {
                        let ord = compare_values(cell, value)?;
                        Some(match op {
                            CompareOp::Eq => ord == Ordering::Equal,
                            CompareOp::Ne => ord != Ordering::Equal,
                            CompareOp::Lt => ord == Ordering::Less,
                            CompareOp::Le => ord != Ordering::Greater,
                            CompareOp::Gt => ord == Ordering::Greater,
                            CompareOp::Ge => ord != Ordering::Less,
                        })
                    }
                }
            }
            Filter::In { column, values } => {
                if values.is_empty() {
                    return Some(false);
                }
                let cell = row.get(column).unwrap_or(&Value::Null);
                if cell.is_null() {
                    return None;
                }
                let mut unknown = false;
                for v in values {
                    match compare_values(cell, v) {
                        Some(Ordering::Equal) => return Some(true),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Filter::IsNull(column) => Some(row.get(column).map(Value::is_null).unwrap_or(true)),
            Filter::And(parts) => {
                let mut unknown = false;
                for p in parts {
                    match p.eval(row) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            Filter::Or(parts) => {
                let mut unknown = false;
                for p in parts {
                    match p.eval(row) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Filter::Not(inner) => inner.eval(row).map(|b| !b),
        }
    }
}

/// Order two JSON scalars of the same kind. Numbers compare numerically; mixed kinds and nulls do not compare.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
