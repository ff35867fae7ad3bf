use super::Session;
use crate::entity::{Column, Entity, Relation};
use crate::service::ModelState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionType {
    #[serde(default)]
    pub id: i64,
    pub name: String,
}

impl Entity for SessionType {
    fn table_name() -> &'static str {
        "session_types"
    }

    fn columns() -> &'static [Column] {
        const COLUMNS: &[Column] = &[Column::new("id"), Column::new("name")];
        COLUMNS
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn validate(&self, state: &mut ModelState) {
        state.require_text("name", &self.name, 100);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub capacity: Option<i32>,
}

impl Entity for Location {
    fn table_name() -> &'static str {
        "locations"
    }

    fn columns() -> &'static [Column] {
        const COLUMNS: &[Column] = &[Column::new("id"), Column::new("name"), Column::new("capacity")];
        COLUMNS
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn validate(&self, state: &mut ModelState) {
        state.require_text("name", &self.name, 100);
        if matches!(self.capacity, Some(c) if c < 0) {
            state.add_error("capacity", "capacity must not be negative");
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    #[serde(default)]
    pub id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Entity for TimeSlot {
    fn table_name() -> &'static str {
        "time_slots"
    }

    fn columns() -> &'static [Column] {
        const COLUMNS: &[Column] = &[
            Column::new("id"),
            Column::new("starts_at").cast("timestamptz"),
            Column::new("ends_at").cast("timestamptz"),
        ];
        COLUMNS
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn validate(&self, state: &mut ModelState) {
        if self.ends_at <= self.starts_at {
            state.add_error("ends_at", "ends_at must be after starts_at");
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Level {
    #[serde(default)]
    pub id: i64,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<Session>>,
}

impl Entity for Level {
    fn table_name() -> &'static str {
        "levels"
    }

    fn columns() -> &'static [Column] {
        const COLUMNS: &[Column] = &[Column::new("id"), Column::new("name")];
        COLUMNS
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::to_many::<Level, Session>("Sessions", "level_id")]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn validate(&self, state: &mut ModelState) {
        state.require_text("name", &self.name, 100);
    }
}
