//! Confirmation responses for successful writes.
//!
//! The body is the absolute URL of the new resource, built from the
//! configured public URL or, failing that, from the forwarded/`Host` headers.

use crate::models::resource::Resource;
use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header, uri::Authority},
    response::{IntoResponse, Response},
};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::str::FromStr;

/// Characters escaped when an id is placed in a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const FORWARDED_HOST: &str = "x-forwarded-host";
const FORWARDED_PROTO: &str = "x-forwarded-proto";
const EXPIRY: HeaderName = HeaderName::from_static("expiry");

/// `/{id}` with the id percent-encoded.
pub fn resource_path(id: &str) -> String {
    format!("/{}", utf8_percent_encode(id, PATH_SEGMENT))
}

/// Scheme and authority the client reached us through, without a trailing slash.
pub fn base_url(headers: &HeaderMap, public_url: Option<&str>) -> Option<String> {
    if let Some(public_url) = public_url {
        return Some(public_url.trim_end_matches('/').to_string());
    }

    let host = headers
        .get(FORWARDED_HOST)
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|v| Authority::from_str(v).ok())?;

    let proto = match headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    };

    Some(format!("{}://{}", proto, host))
}

/// `201 Created` with the resource URL as a plain-text body.
pub fn created(headers: &HeaderMap, public_url: Option<&str>, resource: &Resource) -> Response {
    let path = resource_path(&resource.id);
    let location = match base_url(headers, public_url) {
        Some(base) => format!("{}{}", base, path),
        None => path,
    };

    let mut response = (StatusCode::CREATED, location.clone()).into_response();
    let resp_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&location) {
        resp_headers.insert(header::LOCATION, value);
    }

    let expiry = resource
        .expires_at
        .map(|ts| ts.to_string())
        .unwrap_or_else(|| "-1".into());
    if let Ok(value) = HeaderValue::from_str(&expiry) {
        resp_headers.insert(EXPIRY, value);
    }

    if let Some(etag) = resource.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            resp_headers.insert(header::ETAG, value);
        }
    }

    response
}
