//! Sample conference domain: sessions and their lookup entities.

mod lookups;
mod session;

pub use lookups::{Level, Location, SessionType, TimeSlot};
pub use session::Session;

use crate::handlers::ControllerRegistry;
use crate::store::StoreProvider;
use crate::Controller;

/// Relations the sessions controller always eager-loads.
pub const SESSION_INCLUDES: [&str; 4] = ["SessionType", "Location", "TimeSlot", "Level"];

pub fn sessions_controller() -> Controller<Session> {
    Controller::new("sessions").with_includes(SESSION_INCLUDES)
}

/// Registry with one controller per sample entity.
pub fn sample_registry<P: StoreProvider>() -> ControllerRegistry<P> {
    ControllerRegistry::new()
        .register(sessions_controller())
        .register(Controller::<SessionType>::new("sessiontypes"))
        .register(Controller::<Location>::new("locations"))
        .register(Controller::<TimeSlot>::new("timeslots"))
        .register(Controller::<Level>::new("levels").with_includes(["Sessions"]))
}

/// DDL for the sample tables. Idempotent.
pub const SAMPLE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS {schema}"session_types" (
        "id" BIGSERIAL PRIMARY KEY,
        "name" TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS {schema}"locations" (
        "id" BIGSERIAL PRIMARY KEY,
        "name" TEXT NOT NULL,
        "capacity" INTEGER
    )"#,
    r#"CREATE TABLE IF NOT EXISTS {schema}"time_slots" (
        "id" BIGSERIAL PRIMARY KEY,
        "starts_at" TIMESTAMPTZ NOT NULL,
        "ends_at" TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS {schema}"levels" (
        "id" BIGSERIAL PRIMARY KEY,
        "name" TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS {schema}"sessions" (
        "id" BIGSERIAL PRIMARY KEY,
        "title" TEXT NOT NULL,
        "description" TEXT,
        "session_type_id" BIGINT NOT NULL REFERENCES {schema}"session_types" ("id"),
        "location_id" BIGINT NOT NULL REFERENCES {schema}"locations" ("id"),
        "time_slot_id" BIGINT NOT NULL REFERENCES {schema}"time_slots" ("id"),
        "level_id" BIGINT NOT NULL REFERENCES {schema}"levels" ("id"),
        "created_on" TIMESTAMPTZ,
        "modified_on" TIMESTAMPTZ,
        "version" BIGINT NOT NULL DEFAULT 0
    )"#,
];
