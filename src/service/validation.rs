//! Model binding and validation state for request bodies.

use crate::entity::Entity;
use crate::error::AppError;

/// Binding and validation messages collected for one request body, keyed by field.
#[derive(Clone, Debug, Default)]
pub struct ModelState {
    errors: Vec<(String, String)>,
}

impl ModelState {
    pub fn new() -> Self {
        ModelState::default()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push((field.into(), message.into()));
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Flattened messages across all fields, in the order they were recorded.
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|(_, m)| m.as_str())
    }

    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }

    pub fn into_error(self) -> AppError {
        AppError::Validation(self.errors.into_iter().map(|(_, m)| m).collect())
    }

    /// Non-blank text of at most `max` characters.
    pub fn require_text(&mut self, field: &str, value: &str, max: usize) {
        if value.trim().is_empty() {
            self.add_error(field, format!("{} is required", field));
        } else if value.chars().count() > max {
            self.add_error(field, format!("{} must be at most {} characters", field, max));
        }
    }

    pub fn require_positive(&mut self, field: &str, value: i64) {
        if value <= 0 {
            self.add_error(field, format!("{} must be a positive id", field));
        }
    }
}

/// Deserialize a JSON request body without running entity rules.
pub fn bind_body<T: Entity>(body: &[u8]) -> Result<T, AppError> {
    let mut state = ModelState::new();
    if body.iter().all(u8::is_ascii_whitespace) {
        state.add_error("body", "request body is required");
        return Err(state.into_error());
    }
    serde_json::from_slice::<T>(body).map_err(|e| {
        state.add_error("body", format!("invalid {} body: {}", T::table_name(), e));
        state.into_error()
    })
}

/// Bind a JSON request body into an entity and run its validation rules.
pub fn bind_model<T: Entity>(body: &[u8]) -> Result<T, AppError> {
    let value = bind_body::<T>(body)?;
    let mut state = ModelState::new();
    value.validate(&mut state);
    state.into_result()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Level, Session};

    #[test]
    fn errors_are_flattened_in_order() {
        let mut state = ModelState::new();
        state.add_error("title", "title is required");
        state.add_error("level_id", "level_id must be a positive id");
        state.add_error("title", "title is too short");
        let all: Vec<_> = state.errors().collect();
        assert_eq!(all, vec!["title is required", "level_id must be a positive id", "title is too short"]);
        assert!(!state.is_valid());
    }

    #[test]
    fn bind_model_accepts_valid_body() {
        let level: Level = bind_model(br#"{"id": 0, "name": "Intermediate"}"#).unwrap();
        assert_eq!(level.name, "Intermediate");
    }

    #[test]
    fn bind_model_reports_entity_rules() {
        let body = br#"{"title": "", "session_type_id": 1, "location_id": 0, "time_slot_id": 1, "level_id": 1}"#;
        match bind_model::<Session>(body) {
            Err(AppError::Validation(messages)) => {
                assert!(messages.contains(&"title is required".to_string()));
                assert!(messages.contains(&"location_id must be a positive id".to_string()));
            }
            other => panic!("expected validation error, got {:?}", other.map(|s| s.title)),
        }
    }

    #[test]
    fn bind_model_rejects_empty_and_malformed_bodies() {
        assert!(matches!(bind_model::<Level>(b""), Err(AppError::Validation(_))));
        assert!(matches!(bind_model::<Level>(b"[1,2]"), Err(AppError::Validation(_))));
    }

    #[test]
    fn bind_body_skips_entity_rules() {
        let level: Level = bind_body(br#"{"id": 4, "name": ""}"#).unwrap();
        assert_eq!(level.id, 4);
        assert!(bind_model::<Level>(br#"{"id": 4, "name": ""}"#).is_err());
    }
}
