//! Per-request retention settings carried in write request headers.
//!
//! - `Max-Access`: number of reads before the resource is deleted
//! - `Expire-In`: lifetime in seconds from now
//! - `Expiry-Timestamp`: absolute unix expiry
//! - `Slug-Length`: requested length of a generated code

use crate::{errors::AppError, models::resource::Retention};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use thiserror::Error;

pub const MAX_ACCESS_HEADER: &str = "max-access";
pub const EXPIRE_IN_HEADER: &str = "expire-in";
pub const EXPIRY_TIMESTAMP_HEADER: &str = "expiry-timestamp";
pub const SLUG_LENGTH_HEADER: &str = "slug-length";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("header `{0}` has an invalid value")]
    Malformed(&'static str),
    #[error("`Max-Access` must be at least 1")]
    ZeroAccesses,
    #[error("`Expire-In` and `Expiry-Timestamp` cannot be combined")]
    ConflictingExpiry,
    #[error("requested expiry is not in the future")]
    ExpiryInPast,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSettings {
    max_access: Option<u16>,
    expiry_timestamp: Option<i64>,
    expire_in: Option<u64>,
    slug_length: Option<u8>,
}

impl RecordSettings {
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Result<Self, SettingsError> {
        let settings = Self {
            max_access: header_value(headers, MAX_ACCESS_HEADER)?,
            expiry_timestamp: header_value(headers, EXPIRY_TIMESTAMP_HEADER)?,
            expire_in: header_value(headers, EXPIRE_IN_HEADER)?,
            slug_length: header_value(headers, SLUG_LENGTH_HEADER)?,
        };

        if settings.max_access == Some(0) {
            return Err(SettingsError::ZeroAccesses);
        }
        if settings.expiry_timestamp.is_some() && settings.expire_in.is_some() {
            return Err(SettingsError::ConflictingExpiry);
        }
        if matches!(settings.expiry_timestamp, Some(ts) if ts <= now.timestamp()) {
            return Err(SettingsError::ExpiryInPast);
        }
        if let Some(age) = settings.expire_in {
            if age == 0 {
                return Err(SettingsError::ExpiryInPast);
            }
            if offset(now.timestamp(), age).is_none() {
                return Err(SettingsError::Malformed(EXPIRE_IN_HEADER));
            }
        }

        Ok(settings)
    }

    pub fn slug_length(&self) -> Option<u8> {
        self.slug_length
    }

    /// Resolve the retention for a write happening at `now`.
    ///
    /// `max_age` bounds the lifetime: a requested expiry past it is clamped,
    /// and with no request the resource expires exactly at the bound.
    pub fn retention(&self, max_age: Option<u64>, now: DateTime<Utc>) -> Retention {
        let now = now.timestamp();
        let bound = max_age.map(|age| offset(now, age).unwrap_or(i64::MAX));

        let requested = self
            .expiry_timestamp
            .or_else(|| self.expire_in.map(|age| offset(now, age).unwrap_or(i64::MAX)));

        let expires_at = match (requested, bound) {
            (Some(ts), Some(max)) => Some(ts.min(max)),
            (Some(ts), None) => Some(ts),
            (None, bound) => bound,
        };

        Retention {
            expires_at,
            max_accesses: self.max_access.map(i64::from),
        }
    }
}

/// `now + secs`, or `None` when it does not fit a timestamp.
fn offset(now: i64, secs: u64) -> Option<i64> {
    i64::try_from(secs).ok().and_then(|secs| now.checked_add(secs))
}

fn header_value<T: FromStr>(
    headers: &HeaderMap,
    name: &'static str,
) -> Result<Option<T>, SettingsError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<T>().ok())
                .ok_or(SettingsError::Malformed(name))
        })
        .transpose()
}

impl<S> FromRequestParts<S> for RecordSettings
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers, Utc::now())?)
    }
}
