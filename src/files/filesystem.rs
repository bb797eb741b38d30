/// Local-filesystem file store.
///
/// Blobs live under a sharded layout (`root/<id[0:2]>/<id[2:4]>/<id>`) to
/// keep directories small. Ingestion streams through a temp file while
/// hashing, then renames into place atomically; the temp file is removed
/// on every exit path. Presigned URLs carry an HMAC token validated in
/// constant time.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::files::{
    content_type_for, derive_file_id, extract_original_file_name, FileId, FileMetadata,
    FileStore,
};

type HmacSha256 = Hmac<Sha256>;

/// Default streaming chunk size: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Filesystem store configuration.
#[derive(Debug, Clone)]
pub struct FilesystemConfig {
    pub root: PathBuf,
    /// Public base URL for serving; empty disables URL generation.
    pub base_url: String,
    /// HMAC secret for presigned URLs; required whenever `base_url` is
    /// set.
    pub secret_key: String,
    /// Maximum accepted file size in bytes; 0 = unlimited.
    pub max_file_size: u64,
    /// Bytes per read/write during ingestion; 0 = default (2 MiB).
    pub chunk_size: usize,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/files"),
            base_url: String::new(),
            secret_key: String::new(),
            max_file_size: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl FilesystemConfig {
    pub fn validate(&self) -> StoreResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(StoreError::config_field("root", "root path is required"));
        }
        if !self.base_url.trim().is_empty() && self.secret_key.trim().is_empty() {
            return Err(StoreError::config_field(
                "secret_key",
                "BaseURL requires SecretKey",
            ));
        }
        Ok(())
    }

    /// Derive from the unified config: `file_path` is the root and the
    /// options map may carry `base_url`, `secret_key`, `max_file_size`
    /// and `chunk_size`.
    pub fn from_store_config(config: &crate::config::StoreConfig) -> Self {
        let opt = |key: &str| config.options.get(key).cloned().unwrap_or_default();
        Self {
            root: PathBuf::from(&config.file_path),
            base_url: opt("base_url"),
            secret_key: opt("secret_key"),
            max_file_size: opt("max_file_size").parse().unwrap_or(0),
            chunk_size: opt("chunk_size").parse().unwrap_or(DEFAULT_CHUNK_SIZE),
        }
    }
}

/// Content-addressed store on the local filesystem.
#[derive(Clone)]
pub struct FilesystemStore {
    config: FilesystemConfig,
}

/// Removes the temp file unless defused; covers early returns and
/// panics during ingestion.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove temp upload");
                }
            }
        }
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FilesystemStore {
    pub fn new(mut config: FilesystemConfig) -> StoreResult<Self> {
        config.validate()?;
        if config.chunk_size == 0 {
            config.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &FilesystemConfig {
        &self.config
    }

    fn shard_dir(&self, id: &FileId) -> PathBuf {
        let name = id.as_str();
        self.config.root.join(&name[0..2]).join(&name[2..4])
    }

    fn path_for(&self, id: &FileId) -> PathBuf {
        self.shard_dir(id).join(id.as_str())
    }

    fn temp_path(&self) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.config
            .root
            .join(format!("upload-{}-{n}", std::process::id()))
    }

    fn io_err(op: &str, err: std::io::Error) -> StoreError {
        StoreError::driver("filesystem", op, err)
    }

    fn signature(&self, subject: &str, timestamp: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(subject.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn token_for(&self, id: &FileId, expires: Duration) -> String {
        let expires_at = Utc::now().timestamp() + expires.as_secs() as i64;
        let ts = expires_at.to_string();
        let sig = self.signature(id.as_str(), &ts);
        format!("{ts}.{sig}")
    }

    /// Validate a `{expires_unix}.{hex_hmac}` token for a signed subject
    /// (the file id). The signature comparison is constant-time.
    pub fn validate_token(&self, subject: &str, token: &str) -> bool {
        let parts: Vec<&str> = token.splitn(3, '.').collect();
        if parts.len() != 2 {
            return false;
        }
        let (ts, sig) = (parts[0], parts[1]);

        let Ok(expires_at) = ts.parse::<i64>() else {
            return false;
        };
        if Utc::now().timestamp() > expires_at {
            return false;
        }

        let Ok(sig_bytes) = hex::decode(sig) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(subject.as_bytes());
        mac.update(b":");
        mac.update(ts.as_bytes());
        mac.verify_slice(&sig_bytes).is_ok()
    }

    async fn metadata_at(&self, id: &FileId, path: &Path) -> StoreResult<FileMetadata> {
        let meta = match fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::record_not_found("files", id.as_str()));
            }
            Err(e) => return Err(Self::io_err("stat", e)),
        };

        let name = extract_original_file_name(id).unwrap_or_else(|| id.as_str().to_string());
        Ok(FileMetadata {
            content_type: content_type_for(&name),
            name,
            path: id.as_str().to_string(),
            size: meta.len(),
        })
    }
}

#[async_trait]
impl FileStore for FilesystemStore {
    async fn store(
        &self,
        _ctx: &Context,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<(FileId, FileMetadata)> {
        fs::create_dir_all(&self.config.root)
            .await
            .map_err(|e| Self::io_err("mkdir", e))?;

        let temp_path = self.temp_path();
        let mut guard = TempGuard::new(temp_path.clone());
        let mut temp = fs::File::create(&temp_path)
            .await
            .map_err(|e| Self::io_err("create_temp", e))?;

        // Single pass: hash and write chunk by chunk, enforcing the size
        // cap on the running total.
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut buf = vec![0u8; self.config.chunk_size];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| Self::io_err("read_stream", e))?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if self.config.max_file_size > 0 && written > self.config.max_file_size {
                return Err(StoreError::validation(format!(
                    "file exceeds maximum size of {} bytes",
                    self.config.max_file_size
                )));
            }
            hasher.update(&buf[..n]);
            temp.write_all(&buf[..n])
                .await
                .map_err(|e| Self::io_err("write_temp", e))?;
        }

        let content_hash = hex::encode(hasher.finalize());
        let id = derive_file_id(&content_hash, name);
        let final_path = self.path_for(&id);

        // Dedup: an existing blob under this id is byte-identical.
        if fs::metadata(&final_path).await.is_ok() {
            debug!(id = %id, "store deduplicated");
            let meta = self.metadata_at(&id, &final_path).await?;
            return Ok((id, meta));
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_err("mkdir", e))?;
        }

        temp.sync_all()
            .await
            .map_err(|e| Self::io_err("sync_temp", e))?;
        drop(temp);
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| Self::io_err("rename", e))?;
        guard.defuse();

        debug!(id = %id, size = written, "stored file");
        let meta = self.metadata_at(&id, &final_path).await?;
        Ok((id, meta))
    }

    async fn retrieve(
        &self,
        _ctx: &Context,
        id: &FileId,
    ) -> StoreResult<(Box<dyn AsyncRead + Send + Unpin>, FileMetadata)> {
        let path = self.path_for(id);
        let meta = self.metadata_at(id, &path).await?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::record_not_found("files", id.as_str())
            } else {
                Self::io_err("open", e)
            }
        })?;
        Ok((Box::new(file), meta))
    }

    async fn delete(&self, _ctx: &Context, id: &FileId) -> StoreResult<()> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::record_not_found("files", id.as_str()))
            }
            Err(e) => Err(Self::io_err("delete", e)),
        }
    }

    async fn exists(&self, _ctx: &Context, id: &FileId) -> StoreResult<bool> {
        match fs::metadata(self.path_for(id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_err("stat", e)),
        }
    }

    async fn metadata(&self, _ctx: &Context, id: &FileId) -> StoreResult<FileMetadata> {
        self.metadata_at(id, &self.path_for(id)).await
    }

    async fn list(
        &self,
        _ctx: &Context,
        page_size: i32,
        page_token: &str,
    ) -> StoreResult<(Vec<FileMetadata>, String)> {
        // The layout is exactly two shard levels deep, so a fixed walk
        // suffices; temp uploads live at the root and are skipped along
        // with everything else that isn't a shard directory.
        let mut names: Vec<String> = Vec::new();

        let mut level1 = match fs::read_dir(&self.config.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), String::new()));
            }
            Err(e) => return Err(Self::io_err("list", e)),
        };
        while let Some(entry) = level1.next_entry().await.map_err(|e| Self::io_err("list", e))? {
            if !entry.file_type().await.map_err(|e| Self::io_err("list", e))?.is_dir() {
                continue;
            }
            let mut level2 = fs::read_dir(entry.path())
                .await
                .map_err(|e| Self::io_err("list", e))?;
            while let Some(shard) =
                level2.next_entry().await.map_err(|e| Self::io_err("list", e))?
            {
                if !shard.file_type().await.map_err(|e| Self::io_err("list", e))?.is_dir() {
                    continue;
                }
                let mut leaves = fs::read_dir(shard.path())
                    .await
                    .map_err(|e| Self::io_err("list", e))?;
                while let Some(leaf) =
                    leaves.next_entry().await.map_err(|e| Self::io_err("list", e))?
                {
                    let name = leaf.file_name().to_string_lossy().to_string();
                    if name.starts_with("upload-") {
                        continue;
                    }
                    names.push(name);
                }
            }
        }

        names.sort();
        let start = if page_token.is_empty() {
            0
        } else {
            names
                .iter()
                .position(|n| n == page_token)
                .map(|i| i + 1)
                .unwrap_or(0)
        };
        let end = (start + page_size.max(0) as usize).min(names.len());

        let mut items = Vec::with_capacity(end.saturating_sub(start));
        for name in &names[start..end] {
            let Some(id) = FileId::parse(name) else {
                continue;
            };
            items.push(self.metadata_at(&id, &self.path_for(&id)).await?);
        }

        let next_token = if end < names.len() {
            names[end - 1].clone()
        } else {
            String::new()
        };
        Ok((items, next_token))
    }

    async fn presigned_url(
        &self,
        ctx: &Context,
        id: &FileId,
        expires: Duration,
    ) -> StoreResult<String> {
        if self.config.base_url.is_empty() {
            return Err(StoreError::config_field(
                "base_url",
                "base URL not configured for presigned URLs",
            ));
        }
        if !self.exists(ctx, id).await? {
            return Err(StoreError::record_not_found("files", id.as_str()));
        }

        let token = self.token_for(id, expires);
        Ok(format!(
            "{}/files/{}?token={}",
            self.config.base_url.trim_end_matches('/'),
            id,
            token
        ))
    }

    async fn url(&self, _ctx: &Context, id: &FileId) -> StoreResult<String> {
        if self.config.base_url.is_empty() {
            return Ok(format!("file://{}", self.path_for(id).display()));
        }
        Ok(format!(
            "{}/files/{}",
            self.config.base_url.trim_end_matches('/'),
            id
        ))
    }
}
