//! HTTP handlers for resource writes and reads.
//! File uploads stream to disk; pastes and URLs are small enough to buffer.
//! Storage concerns are delegated to `StorageService`.

use crate::{
    errors::AppError,
    handlers::confirmation::created,
    models::{
        resource::{Resource, ResourceKind},
        settings::RecordSettings,
    },
    services::{id_allocator::IdError, storage_service::Content},
    size_guard::{into_io_error, read_body},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::Response,
};
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use url::Url;

const PASTE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// `PUT /{name}`: store a file under its own name, replacing any earlier
/// upload of the same name. An empty body is a valid, empty file.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    settings: RecordSettings,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let id = state.storage.allocator().allocate_file_id(&name)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(into_io_error));

    let resource = state
        .storage
        .put_file(&id, content_type, &settings, stream)
        .await?;

    tracing::debug!(
        "stored file `{}` ({} bytes)",
        resource.id,
        resource.size_bytes
    );
    Ok(created(&headers, state.public_url(), &resource))
}

/// `POST /paste`: store UTF-8 text under a generated code.
pub async fn create_paste(
    State(state): State<AppState>,
    settings: RecordSettings,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let bytes = read_body(body, state.storage.max_size()).await?;
    if bytes.is_empty() {
        return Err(AppError::validation("paste body cannot be empty"));
    }
    if std::str::from_utf8(&bytes).is_err() {
        return Err(AppError::validation("paste body must be valid UTF-8 text"));
    }

    let resource = state.storage.create_paste(bytes, &settings).await?;
    Ok(created(&headers, state.public_url(), &resource))
}

/// `POST /url`: store a redirect target under a generated code.
pub async fn create_redirect(
    State(state): State<AppState>,
    settings: RecordSettings,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let bytes = read_body(body, state.storage.max_size()).await?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| AppError::validation("url must be valid UTF-8 text"))?;
    let target = validate_target(text)?;

    let resource = state.storage.create_redirect(target, &settings).await?;
    Ok(created(&headers, state.public_url(), &resource))
}

/// `GET /{id}`: serve a file or paste, or redirect to a stored URL.
///
/// `HEAD` answers with the same headers but never counts as a read, so it
/// leaves access-limited resources untouched.
pub async fn get_resource(
    State(state): State<AppState>,
    method: Method,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    if method == Method::HEAD {
        let resource = state.storage.get(&id).await?;
        return resource_response(&resource, Body::empty());
    }

    let opened = state.storage.open(&id).await?;
    let body = match opened.content {
        Content::Redirect(_) => Body::empty(),
        Content::Blob(file) => Body::from_stream(ReaderStream::new(file)),
    };
    resource_response(&opened.resource, body)
}

fn resource_response(resource: &Resource, body: Body) -> Result<Response, AppError> {
    let mut response = Response::new(body);

    if resource.kind == ResourceKind::Redirect {
        let location = resource
            .target
            .as_deref()
            .and_then(|target| HeaderValue::from_str(target).ok())
            .ok_or_else(|| AppError::internal("stored redirect target is not a valid header"))?;
        *response.status_mut() = StatusCode::SEE_OTHER;
        response.headers_mut().insert(header::LOCATION, location);
    } else {
        *response.status_mut() = StatusCode::OK;
        set_resource_headers(response.headers_mut(), resource);
    }
    Ok(response)
}

/// Method fallback for reserved route names such as `/paste` and `/url`.
///
/// A `PUT` there is a file upload under a reserved name.
pub async fn reserved_route(method: Method, uri: Uri) -> AppError {
    let name = uri.path().trim_start_matches('/');
    match method {
        Method::PUT => IdError::Reserved(name.to_string()).into(),
        Method::GET | Method::HEAD => {
            AppError::not_found(format!("no resource found for `{}`", name))
        }
        _ => AppError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{} is not supported on /{}", method, name),
        ),
    }
}

/// Router fallback for paths that can never name a resource.
pub async fn unknown_route(uri: Uri) -> AppError {
    AppError::not_found(format!("nothing is served at {}", uri.path()))
}

fn set_resource_headers(headers: &mut HeaderMap, resource: &Resource) {
    let content_type = match resource.kind {
        ResourceKind::Paste => HeaderValue::from_static(PASTE_CONTENT_TYPE),
        _ => resource
            .content_type
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    };
    headers.insert(header::CONTENT_TYPE, content_type);

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(resource.size_bytes.max(0)),
    );

    if let Some(etag) = resource.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    let last_modified = resource
        .created_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// Check a redirect target and return the form to store.
///
/// Accepts absolute URLs that can act as a base (so not `mailto:` or
/// `javascript:`) and scheme-relative `//host/path` URLs. ASCII targets are
/// kept as sent, trimmed; others are stored serialized, with a punycode host
/// and a percent-encoded path, so they stay valid in `Location`.
fn validate_target(raw: &str) -> Result<String, AppError> {
    let target = raw.trim();
    if target.is_empty() {
        return Err(AppError::validation("url cannot be empty"));
    }
    if target.chars().any(char::is_control) {
        return Err(AppError::validation("url must not contain control characters"));
    }

    let scheme_relative = target.starts_with("//");
    let parsed = if scheme_relative {
        Url::parse(&format!("https:{}", target))
    } else {
        Url::parse(target)
    };

    match parsed {
        Ok(url) if !url.cannot_be_a_base() && url.has_host() => {
            if target.is_ascii() {
                Ok(target.to_string())
            } else if scheme_relative {
                Ok(url.as_str().trim_start_matches("https:").to_string())
            } else {
                Ok(url.as_str().to_string())
            }
        }
        Ok(_) => Err(AppError::validation(format!(
            "`{}` cannot be used as a redirect target",
            target
        ))),
        Err(err) => Err(AppError::validation(format!(
            "`{}` is not a valid URL: {}",
            target, err
        ))),
    }
}
