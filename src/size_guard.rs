//! Size Guard: admission control on write request bodies.
//!
//! Declared `Content-Length` values above the limit are refused before any
//! handler runs; everything else gets its body wrapped in a `Limited`, so a
//! chunked or lying upload fails as soon as it passes the limit. Handlers
//! surface that as a `413` tagged with `SizeLimitExceeded`, which this layer
//! turns into the configured answer: a torn-down response in `Abort` mode, a
//! `{message}` body in `Status` mode.

use crate::{config::SizeLimitResponse, errors::AppError};
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::stream;
use http_body_util::{LengthLimitError, Limited};
use std::{error::Error as StdError, io};

/// Marker placed on responses that report an exceeded body limit.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimitExceeded;

#[derive(Debug, Clone, Copy)]
pub struct SizeGuard {
    pub max_body_size: u64,
    pub mode: SizeLimitResponse,
}

impl SizeGuard {
    pub fn new(max_body_size: u64, mode: SizeLimitResponse) -> Self {
        Self {
            max_body_size,
            mode,
        }
    }

    fn reject(&self) -> Response {
        match self.mode {
            SizeLimitResponse::Status => AppError::too_large(self.max_body_size).into_response(),
            SizeLimitResponse::Abort => aborted_response(),
        }
    }
}

/// Middleware entry point, mounted with `from_fn_with_state`.
pub async fn size_guard(State(guard): State<SizeGuard>, request: Request, next: Next) -> Response {
    if !matches!(*request.method(), Method::PUT | Method::POST) {
        return next.run(request).await;
    }

    if let Some(declared) = declared_length(request.headers()) {
        if declared > guard.max_body_size {
            tracing::debug!(
                "refusing {} {}: declared body of {} bytes exceeds {}",
                request.method(),
                request.uri().path(),
                declared,
                guard.max_body_size
            );
            return guard.reject();
        }
    }

    let limit = usize::try_from(guard.max_body_size).unwrap_or(usize::MAX);
    let request = request.map(|body| Body::new(Limited::new(body, limit)));
    let response = next.run(request).await;

    if response.extensions().get::<SizeLimitExceeded>().is_some() {
        tracing::debug!("request body passed the {} byte limit", guard.max_body_size);
        return guard.reject();
    }
    response
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// A response whose body fails before completing.
///
/// The server drops the connection when the body errors, so the client never
/// sees a complete response and reports a transport failure.
fn aborted_response() -> Response {
    let body = Body::from_stream(stream::once(async {
        Err::<Bytes, io::Error>(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "request body exceeds the size limit",
        ))
    }));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Whether a body error was raised by the `Limited` wrapper.
pub fn is_length_limit(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return true;
        }
        current = err.source();
    }
    false
}

/// Map a body stream error to an I/O error the store understands.
///
/// Limit breaches become `FileTooLarge`.
pub fn into_io_error(err: axum::Error) -> io::Error {
    if is_length_limit(&err) {
        io::Error::new(io::ErrorKind::FileTooLarge, err)
    } else {
        io::Error::other(err)
    }
}

/// Buffer a whole request body.
pub async fn read_body(body: Body, max_body_size: u64) -> Result<Bytes, AppError> {
    axum::body::to_bytes(body, usize::MAX).await.map_err(|err| {
        if is_length_limit(&err) {
            AppError::too_large(max_body_size)
        } else {
            AppError::new(StatusCode::BAD_REQUEST, "could not read the request body")
        }
    })
}
