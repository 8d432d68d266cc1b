//! Server test utilities.

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, Response},
};
use deaddrop::{config::AppConfig, db, state::AppState};
use std::{path::PathBuf, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;

/// Limit used by the test configuration, small enough to trip on purpose.
pub const TEST_MAX_BODY: u64 = 1024;

/// A router wired to a throwaway database and blob directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig {
            storage_dir: temp_dir.path().join("blobs").display().to_string(),
            database_url: format!("sqlite://{}", temp_dir.path().join("meta.db").display()),
            max_body_size: TEST_MAX_BODY,
            ..Default::default()
        };
        modifier(&mut config);

        std::fs::create_dir_all(&config.storage_dir).expect("Failed to create blob directory");
        let pool = db::connect(&config.database_url)
            .await
            .expect("Failed to open test database");
        db::migrate(&pool).await.expect("Failed to migrate test database");

        let state =
            deaddrop::build_state(Arc::new(pool), config).expect("Failed to build app state");
        let router = deaddrop::app(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.state.storage.base_path.clone()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn put(&self, name: &str, body: impl Into<Body>) -> Response<Body> {
        self.send(
            Request::put(format!("/{}", name))
                .body(body.into())
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, path: &str, body: impl Into<Body>) -> Response<Body> {
        self.send(Request::post(path).body(body.into()).unwrap())
            .await
    }

    pub async fn get(&self, path: &str) -> Response<Body> {
        self.send(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    /// Store a paste and return the generated id.
    pub async fn paste(&self, text: &str) -> String {
        let response = self.post("/paste", text.to_string()).await;
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);
        id_from_confirmation(&body_string(response).await)
    }

    /// Number of committed blob files on disk.
    pub fn blob_count(&self) -> usize {
        count_files(&self.blob_dir())
    }
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body")
}

pub async fn body_string(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).expect("body is not UTF-8")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("body is not JSON")
}

/// The id at the end of a confirmation URL.
pub fn id_from_confirmation(body: &str) -> String {
    body.trim()
        .rsplit('/')
        .next()
        .expect("confirmation has a path")
        .to_string()
}

fn count_files(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
