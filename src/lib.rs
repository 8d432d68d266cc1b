//! Dead-drop storage service: named file uploads, text pastes and short-URL
//! redirects, served back by identifier over HTTP.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod size_guard;
pub mod state;

use crate::{
    config::AppConfig,
    services::{id_allocator::IdAllocator, storage_service::StorageService},
    state::AppState,
};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Assemble the storage service and shared state from a configuration.
pub fn build_state(db: Arc<SqlitePool>, cfg: AppConfig) -> anyhow::Result<AppState> {
    let storage = StorageService::new(
        db,
        cfg.storage_dir.clone(),
        IdAllocator::new(cfg.slug_length),
        cfg.max_body_size,
    )
    .with_retention(cfg.retention_curve()?);

    Ok(AppState::new(storage, cfg))
}

/// The full application router.
pub fn app(state: AppState) -> Router {
    routes::routes::routes(state)
}
