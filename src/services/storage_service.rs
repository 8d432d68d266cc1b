//! src/services/storage_service.rs
//!
//! StorageService: the resource store. Metadata lives in SQLite, file and
//! paste payloads live on disk as immutable blobs sharded beneath
//! `base_path/{shard}/{shard}/{blob}`.
//!
//! A write streams into a temporary file, fsyncs it and renames it to a fresh
//! blob name; the metadata row is committed last, so readers see either the
//! previous payload or the complete new one. Overwrites of a file id are
//! serialized through a per-id lock; generated ids are claimed by a plain
//! `INSERT`, whose primary key makes check-and-set atomic.

use crate::{
    models::{
        resource::{Resource, ResourceKind, Retention},
        settings::RecordSettings,
    },
    services::{id_allocator::IdAllocator, retention::RetentionCurve},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no resource found for `{0}`")]
    NotFound(String),
    #[error("`{id}` is already taken by a {kind}")]
    KindConflict { id: String, kind: ResourceKind },
    #[error("identifier `{0}` is already in use")]
    IdTaken(String),
    #[error("payload exceeds the {0} byte limit")]
    TooLarge(u64),
    #[error("could not allocate a free identifier after {0} attempts")]
    CollisionExhausted(u32),
    #[error("resource `{0}` has no payload")]
    MissingPayload(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Lookups tried before a vanished blob is reported as missing.
const OPEN_ATTEMPTS: u32 = 3;

/// A payload blob written to disk but not yet referenced by a row.
///
/// Dropping it without `commit` removes the file, so an aborted or rejected
/// write leaves nothing behind.
#[derive(Debug)]
pub struct StagedBlob {
    name: String,
    path: PathBuf,
    size: u64,
    etag: String,
    committed: bool,
}

impl StagedBlob {
    pub fn size(&self) -> u64 {
        self.size
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// What gets stored under an id.
#[derive(Debug)]
pub enum Payload {
    Blob(StagedBlob),
    Target(String),
}

impl Payload {
    fn size(&self) -> u64 {
        match self {
            Payload::Blob(blob) => blob.size,
            Payload::Target(target) => target.len() as u64,
        }
    }

    fn commit(&mut self) {
        if let Payload::Blob(blob) = self {
            blob.commit();
        }
    }
}

/// Readable content of a resource.
#[derive(Debug)]
pub enum Content {
    Blob(File),
    Redirect(String),
}

#[derive(Debug)]
pub struct OpenedResource {
    pub resource: Resource,
    pub content: Content,
}

/// StorageService provides the resource store operations:
/// - `put` writes or overwrites a resource under a known id
/// - `create_generated` stores a paste or redirect under a fresh code
/// - `get` / `exists` look resources up
/// - `open` returns a readable payload and accounts for limited accesses
/// - `purge_expired` drops expired rows and their blobs
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payload blobs are stored.
    pub base_path: PathBuf,

    allocator: IdAllocator,
    max_size: u64,
    retention: Option<RetentionCurve>,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for payload blobs.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        allocator: IdAllocator,
        max_size: u64,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            allocator,
            max_size,
            retention: None,
            write_locks: Arc::new(DashMap::new()),
        }
    }

    /// Bound file lifetimes by size.
    pub fn with_retention(mut self, retention: Option<RetentionCurve>) -> Self {
        self.retention = retention;
        self
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Two-level shard directories for a blob name, from MD5(name).
    fn blob_shards(name: &str) -> (String, String) {
        let digest = md5::compute(name);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::blob_shards(name);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    /// Stream a payload into a new blob.
    ///
    /// Counts bytes and computes the MD5 etag while writing. Fails with
    /// `TooLarge` as soon as the payload passes `max_size`; a stream error of
    /// kind `FileTooLarge` is reported the same way.
    pub async fn stage_blob<S>(&self, stream: S) -> StorageResult<StagedBlob>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let name = Uuid::new_v4().simple().to_string();
        let final_path = self.blob_path(&name);
        let parent = final_path
            .parent()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| io::Error::other("blob path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let mut staged = StagedBlob {
            name,
            path: parent.join(format!(".tmp-{}", Uuid::new_v4())),
            size: 0,
            etag: String::new(),
            committed: false,
        };
        let mut file = File::create(&staged.path).await?;

        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| match err.kind() {
                ErrorKind::FileTooLarge => StorageError::TooLarge(self.max_size),
                _ => StorageError::Io(err),
            })?;
            staged.size += chunk.len() as u64;
            if staged.size > self.max_size {
                return Err(StorageError::TooLarge(self.max_size));
            }
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&staged.path, &final_path).await?;
        staged.path = final_path;
        staged.etag = format!("{:x}", digest.compute());

        Ok(staged)
    }

    /// Write `payload` under `id`.
    ///
    /// Files overwrite any earlier file with the same id; the last committed
    /// write wins and is visible to the next read. Pastes and redirects are
    /// immutable: an existing id yields `IdTaken`.
    pub async fn put(
        &self,
        id: &str,
        kind: ResourceKind,
        mut payload: Payload,
        content_type: Option<String>,
        retention: Retention,
    ) -> StorageResult<Resource> {
        if payload.size() > self.max_size {
            return Err(StorageError::TooLarge(self.max_size));
        }

        let resource = match kind {
            ResourceKind::File => {
                self.overwrite_file(id, &payload, content_type, retention)
                    .await?
            }
            _ => {
                self.insert_row(id, kind, &payload, content_type, retention)
                    .await?
            }
        };
        payload.commit();

        debug!("stored {} `{}` ({} bytes)", kind, id, resource.size_bytes);
        Ok(resource)
    }

    /// Stream a file upload and store it under `id`.
    ///
    /// With a retention curve configured, the file's expiry is bounded by the
    /// lifetime its size allows.
    pub async fn put_file<S>(
        &self,
        id: &str,
        content_type: Option<String>,
        settings: &RecordSettings,
        stream: S,
    ) -> StorageResult<Resource>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let blob = self.stage_blob(stream).await?;
        let max_age = self.retention.map(|curve| curve.compute_for(blob.size()));
        let retention = settings.retention(max_age, Utc::now());

        self.put(
            id,
            ResourceKind::File,
            Payload::Blob(blob),
            content_type,
            retention,
        )
        .await
    }

    /// Store a paste under a freshly generated code.
    pub async fn create_paste(
        &self,
        body: Bytes,
        settings: &RecordSettings,
    ) -> StorageResult<Resource> {
        let blob = self
            .stage_blob(stream::once(async move { Ok::<_, io::Error>(body) }))
            .await?;
        self.create_generated(
            ResourceKind::Paste,
            Payload::Blob(blob),
            settings.slug_length(),
            settings.retention(None, Utc::now()),
        )
        .await
    }

    /// Store a redirect target under a freshly generated code.
    pub async fn create_redirect(
        &self,
        target: String,
        settings: &RecordSettings,
    ) -> StorageResult<Resource> {
        self.create_generated(
            ResourceKind::Redirect,
            Payload::Target(target),
            settings.slug_length(),
            settings.retention(None, Utc::now()),
        )
        .await
    }

    /// Claim a generated id and store `payload` under it in one step.
    ///
    /// Candidates that already exist are skipped; the `INSERT` is the
    /// authoritative check, so two concurrent callers can never end up with
    /// the same code. Gives up after the allocator's bounded attempts.
    pub async fn create_generated(
        &self,
        kind: ResourceKind,
        mut payload: Payload,
        requested_length: Option<u8>,
        retention: Retention,
    ) -> StorageResult<Resource> {
        if payload.size() > self.max_size {
            return Err(StorageError::TooLarge(self.max_size));
        }

        for candidate in self.allocator.candidates(requested_length) {
            if self.exists(&candidate).await? {
                debug!("generated id `{}` already exists, retrying", candidate);
                continue;
            }
            match self
                .insert_row(&candidate, kind, &payload, None, retention)
                .await
            {
                Ok(resource) => {
                    payload.commit();
                    debug!("stored {} `{}`", kind, resource.id);
                    return Ok(resource);
                }
                Err(StorageError::IdTaken(id)) => {
                    debug!("lost the race for generated id `{}`, retrying", id);
                }
                Err(err) => return Err(err),
            }
        }

        let attempts = self.allocator.max_attempts();
        error!(
            "no free {} id after {} attempts, the id space is crowded",
            kind, attempts
        );
        Err(StorageError::CollisionExhausted(attempts))
    }

    /// Exact-match lookup of a live resource.
    ///
    /// Expired resources and resources without accesses left are reported as
    /// `NotFound` even before the sweeper removes them.
    pub async fn get(&self, id: &str) -> StorageResult<Resource> {
        sqlx::query_as::<_, Resource>(
            "SELECT id, kind, blob, target, content_type, size_bytes, etag,
                    created_at, expires_at, remaining_accesses
             FROM resources
             WHERE id = ?
               AND (expires_at IS NULL OR expires_at > ?)
               AND (remaining_accesses IS NULL OR remaining_accesses > 0)",
        )
        .bind(id)
        .bind(Utc::now().timestamp())
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Whether any row, live or not yet purged, occupies `id`.
    pub async fn exists(&self, id: &str) -> StorageResult<bool> {
        let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM resources WHERE id = ?)")
            .bind(id)
            .fetch_one(&*self.db)
            .await?;
        Ok(found != 0)
    }

    /// Fetch a resource for reading.
    ///
    /// Opens the blob of files and pastes. A blob replaced by a concurrent
    /// overwrite between lookup and open triggers a fresh lookup. For
    /// access-limited resources one access is consumed; the last one deletes
    /// the resource, while the already opened handle stays readable.
    pub async fn open(&self, id: &str) -> StorageResult<OpenedResource> {
        let mut attempt = 1;
        let (mut resource, content) = loop {
            let resource = self.get(id).await?;
            match self.open_content(&resource).await {
                Ok(content) => break (resource, content),
                Err(StorageError::NotFound(_)) if attempt < OPEN_ATTEMPTS => {
                    debug!("blob of `{}` was replaced while opening, retrying", id);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        if resource.remaining_accesses.is_some() {
            resource = self.consume_access(&resource).await?;
        }

        Ok(OpenedResource { resource, content })
    }

    async fn open_content(&self, resource: &Resource) -> StorageResult<Content> {
        if resource.kind == ResourceKind::Redirect {
            return resource
                .target
                .clone()
                .map(Content::Redirect)
                .ok_or_else(|| StorageError::MissingPayload(resource.id.clone()));
        }

        let blob = resource
            .blob
            .as_deref()
            .ok_or_else(|| StorageError::MissingPayload(resource.id.clone()))?;
        match File::open(self.blob_path(blob)).await {
            Ok(file) => Ok(Content::Blob(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(resource.id.clone()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Decrement the remaining accesses of exactly the version that was read.
    async fn consume_access(&self, resource: &Resource) -> StorageResult<Resource> {
        let updated = sqlx::query_as::<_, Resource>(
            "UPDATE resources
             SET remaining_accesses = remaining_accesses - 1
             WHERE id = ? AND blob IS ? AND remaining_accesses > 0
             RETURNING id, kind, blob, target, content_type, size_bytes, etag,
                       created_at, expires_at, remaining_accesses",
        )
        .bind(&resource.id)
        .bind(&resource.blob)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::NotFound(resource.id.clone()))?;

        if updated.remaining_accesses == Some(0) {
            debug!("`{}` has no accesses left, removing", updated.id);
            let removed: Option<Option<String>> = sqlx::query_scalar(
                "DELETE FROM resources WHERE id = ? AND remaining_accesses = 0 RETURNING blob",
            )
            .bind(&updated.id)
            .fetch_optional(&*self.db)
            .await?;
            if let Some(Some(blob)) = removed {
                self.remove_blob(&blob).await;
            }
        }

        Ok(updated)
    }

    /// Delete expired and exhausted resources along with their blobs.
    ///
    /// Returns how many resources were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let blobs: Vec<Option<String>> = sqlx::query_scalar(
            "DELETE FROM resources
             WHERE (expires_at IS NOT NULL AND expires_at <= ?)
                OR remaining_accesses = 0
             RETURNING blob",
        )
        .bind(now.timestamp())
        .fetch_all(&*self.db)
        .await?;

        for blob in blobs.iter().flatten() {
            self.remove_blob(blob).await;
        }

        Ok(blobs.len() as u64)
    }

    /// Replace the file stored under `id`, holding its write lock.
    async fn overwrite_file(
        &self,
        id: &str,
        payload: &Payload,
        content_type: Option<String>,
        retention: Retention,
    ) -> StorageResult<Resource> {
        let lock = self
            .write_locks
            .entry(id.to_string())
            .or_default()
            .clone();

        let result = {
            let _held = lock.lock().await;
            self.upsert_file(id, payload, content_type, retention).await
        };

        drop(lock);
        self.write_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn upsert_file(
        &self,
        id: &str,
        payload: &Payload,
        content_type: Option<String>,
        retention: Retention,
    ) -> StorageResult<Resource> {
        let previous: Option<(ResourceKind, Option<String>)> =
            sqlx::query_as("SELECT kind, blob FROM resources WHERE id = ?")
                .bind(id)
                .fetch_optional(&*self.db)
                .await?;

        if let Some((kind, _)) = &previous {
            if *kind != ResourceKind::File {
                return Err(StorageError::KindConflict {
                    id: id.to_string(),
                    kind: *kind,
                });
            }
        }

        let (blob, target, etag) = payload_columns(payload);
        let stored = sqlx::query_as::<_, Resource>(
            r#"
            INSERT INTO resources (
                id, kind, blob, target, content_type, size_bytes,
                etag, created_at, expires_at, remaining_accesses
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                blob = excluded.blob,
                target = excluded.target,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                remaining_accesses = excluded.remaining_accesses
            WHERE resources.kind = 'file'
            RETURNING id, kind, blob, target, content_type, size_bytes,
                      etag, created_at, expires_at, remaining_accesses
            "#,
        )
        .bind(id)
        .bind(ResourceKind::File)
        .bind(blob)
        .bind(target)
        .bind(content_type)
        .bind(payload.size() as i64)
        .bind(etag)
        .bind(Utc::now())
        .bind(retention.expires_at)
        .bind(retention.max_accesses)
        .fetch_optional(&*self.db)
        .await?;

        let Some(stored) = stored else {
            // A generated id took the name between the lookup and the upsert.
            let kind: ResourceKind = sqlx::query_scalar("SELECT kind FROM resources WHERE id = ?")
                .bind(id)
                .fetch_one(&*self.db)
                .await?;
            return Err(StorageError::KindConflict {
                id: id.to_string(),
                kind,
            });
        };

        if let Some((_, Some(old_blob))) = previous {
            if Some(&old_blob) != stored.blob.as_ref() {
                self.remove_blob(&old_blob).await;
            }
        }

        Ok(stored)
    }

    /// Insert a new row; an occupied id yields `IdTaken`.
    async fn insert_row(
        &self,
        id: &str,
        kind: ResourceKind,
        payload: &Payload,
        content_type: Option<String>,
        retention: Retention,
    ) -> StorageResult<Resource> {
        let (blob, target, etag) = payload_columns(payload);
        sqlx::query_as::<_, Resource>(
            r#"
            INSERT INTO resources (
                id, kind, blob, target, content_type, size_bytes,
                etag, created_at, expires_at, remaining_accesses
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, kind, blob, target, content_type, size_bytes,
                      etag, created_at, expires_at, remaining_accesses
            "#,
        )
        .bind(id)
        .bind(kind)
        .bind(blob)
        .bind(target)
        .bind(content_type)
        .bind(payload.size() as i64)
        .bind(etag)
        .bind(Utc::now())
        .bind(retention.expires_at)
        .bind(retention.max_accesses)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StorageError::IdTaken(id.to_string())
            } else {
                StorageError::Sqlx(err)
            }
        })
    }

    /// Best-effort removal of a blob no row references anymore.
    async fn remove_blob(&self, name: &str) {
        let path = self.blob_path(name);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed blob {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
            }
            Err(err) => warn!("failed to remove blob {}: {}", path.display(), err),
        }
    }
}

/// Column values `(blob, target, etag)` for a payload.
fn payload_columns(payload: &Payload) -> (Option<&str>, Option<&str>, Option<&str>) {
    match payload {
        Payload::Blob(blob) => (Some(&blob.name), None, Some(&blob.etag)),
        Payload::Target(target) => (None, Some(target), None),
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
