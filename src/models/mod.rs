//! Core data models for the dead-drop service.
//!
//! `Resource` maps onto the `resources` table via `sqlx::FromRow`;
//! `RecordSettings` is read from the headers of every write request.

pub mod resource;
pub mod settings;
