use super::{Level, Location, SessionType, TimeSlot};
use crate::entity::{Column, CreatedOn, Entity, ModifiedOn, Relation};
use crate::service::ModelState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub session_type_id: i64,
    pub location_id: i64,
    pub time_slot_id: i64,
    pub level_id: i64,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<SessionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_slot: Option<TimeSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
}

impl Session {
    pub fn new(title: &str, session_type_id: i64, location_id: i64, time_slot_id: i64, level_id: i64) -> Self {
        Session {
            id: 0,
            title: title.to_string(),
            description: None,
            session_type_id,
            location_id,
            time_slot_id,
            level_id,
            created_on: None,
            modified_on: None,
            version: 0,
            session_type: None,
            location: None,
            time_slot: None,
            level: None,
        }
    }
}

const COLUMNS: &[Column] = &[
    Column::new("id"),
    Column::new("title"),
    Column::new("description"),
    Column::new("session_type_id"),
    Column::new("location_id"),
    Column::new("time_slot_id"),
    Column::new("level_id"),
    Column::new("created_on").cast("timestamptz").insert_only(),
    Column::new("modified_on").cast("timestamptz"),
    Column::new("version"),
];

impl Entity for Session {
    fn table_name() -> &'static str {
        "sessions"
    }

    fn columns() -> &'static [Column] {
        COLUMNS
    }

    fn relations() -> Vec<Relation> {
        vec![
            Relation::to_one::<SessionType>("SessionType", "session_type_id"),
            Relation::to_one::<Location>("Location", "location_id"),
            Relation::to_one::<TimeSlot>("TimeSlot", "time_slot_id"),
            Relation::to_one::<Level>("Level", "level_id"),
        ]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn version_column() -> Option<&'static str> {
        Some("version")
    }

    fn as_created_on(&mut self) -> Option<&mut dyn CreatedOn> {
        Some(self)
    }

    fn as_modified_on(&mut self) -> Option<&mut dyn ModifiedOn> {
        Some(self)
    }

    fn validate(&self, state: &mut ModelState) {
        state.require_text("title", &self.title, 200);
        state.require_positive("session_type_id", self.session_type_id);
        state.require_positive("location_id", self.location_id);
        state.require_positive("time_slot_id", self.time_slot_id);
        state.require_positive("level_id", self.level_id);
    }
}

impl CreatedOn for Session {
    fn set_created_on(&mut self, at: DateTime<Utc>) {
        self.created_on = Some(at);
    }
}

impl ModifiedOn for Session {
    fn set_modified_on(&mut self, at: DateTime<Utc>) {
        self.modified_on = Some(at);
    }
}
