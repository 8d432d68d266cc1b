//! Defines the routes of the dead-drop service.
//!
//! ## Structure
//! - **Writes** (behind the Size Guard)
//!   - `PUT    /{name}` - upload a file under its own name
//!   - `POST   /paste`  - store a text paste under a generated code
//!   - `POST   /url`    - register a redirect under a generated code
//!
//! - **Reads**
//!   - `GET    /{id}`   - serve a file or paste, or redirect
//!   - `GET    /healthz`, `GET /readyz` - probes
//!
//! `paste`, `url`, `healthz` and `readyz` are reserved and never used as ids.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        resource_handlers::{
            create_paste, create_redirect, get_resource, reserved_route, unknown_route,
            upload_file,
        },
    },
    size_guard::{SizeGuard, size_guard},
    state::AppState,
};
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the application router with its middleware and shared state.
pub fn routes(state: AppState) -> Router {
    let guard = SizeGuard::new(
        state.config.max_body_size,
        state.config.size_limit_response,
    );

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz).fallback(reserved_route))
        .route("/readyz", get(readyz).fallback(reserved_route))
        // generated-id writes
        .route("/paste", post(create_paste).fallback(reserved_route))
        .route("/url", post(create_redirect).fallback(reserved_route))
        // named files and reads of every kind
        .route("/{id}", put(upload_file).get(get_resource))
        .fallback(unknown_route)
        .layer(middleware::from_fn_with_state(guard, size_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
