//! Shared application state handed to every handler.

use crate::{config::AppConfig, services::storage_service::StorageService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(storage: StorageService, config: AppConfig) -> Self {
        Self {
            storage,
            config: Arc::new(config),
        }
    }

    pub fn public_url(&self) -> Option<&str> {
        self.config.public_url.as_deref()
    }
}
