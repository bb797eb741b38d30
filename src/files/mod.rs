/// Content-addressed file storage.
///
/// File identity is derived from content plus original name: two uploads
/// of the same bytes under the same name collapse to one stored blob.
pub mod filesystem;
pub mod repository;
pub mod server;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncRead;

use crate::context::Context;
use crate::error::StoreResult;

pub use filesystem::{FilesystemConfig, FilesystemStore};
pub use repository::{open, FileRepository};

/// FileIDs are a fixed-length hex slice; among other things this is what
/// makes them safe to embed in filesystem paths and URLs.
pub const FILE_ID_LENGTH: usize = 16;

/// A content-derived file identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    /// Accepts exactly `FILE_ID_LENGTH` lowercase hex characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == FILE_ID_LENGTH
            && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// File information without the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    /// The file id; storage location is derived from it.
    pub path: String,
    pub size: u64,
    pub content_type: String,
}

/// Derive a file id from a content hash (lowercase hex) and the original
/// name: `hex(sha256("{content_hash}:{name}"))[..16]`.
pub(crate) fn derive_file_id(content_hash: &str, name: &str) -> FileId {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    FileId(digest[..FILE_ID_LENGTH].to_string())
}

/// Derive the file id for an in-memory buffer.
pub fn generate_file_id(content: &[u8], name: &str) -> FileId {
    let content_hash = hex::encode(Sha256::digest(content));
    derive_file_id(&content_hash, name)
}

/// Original-name recovery is a known gap: ids are one-way hashes and no
/// sidecar is kept, so this always reports nothing and metadata falls
/// back to the id.
pub fn extract_original_file_name(_id: &FileId) -> Option<String> {
    None
}

/// MIME type from a file name's extension; empty when unknown.
pub fn content_type_for(name: &str) -> String {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "txt" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "csv" => "text/csv; charset=utf-8",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",
        _ => "",
    }
    .to_string()
}

/// Backend contract for file storage (filesystem here; object stores
/// elsewhere).
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store a stream under its content-derived id, returning existing
    /// metadata when the file is already present (dedup).
    async fn store(
        &self,
        ctx: &Context,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<(FileId, FileMetadata)>;

    /// Open a file for reading.
    async fn retrieve(
        &self,
        ctx: &Context,
        id: &FileId,
    ) -> StoreResult<(Box<dyn AsyncRead + Send + Unpin>, FileMetadata)>;

    async fn delete(&self, ctx: &Context, id: &FileId) -> StoreResult<()>;

    async fn exists(&self, ctx: &Context, id: &FileId) -> StoreResult<bool>;

    async fn metadata(&self, ctx: &Context, id: &FileId) -> StoreResult<FileMetadata>;

    /// Page through stored files in lexicographic id order. The token is
    /// the last id of the previous page; empty means start (and an empty
    /// returned token means done).
    async fn list(
        &self,
        ctx: &Context,
        page_size: i32,
        page_token: &str,
    ) -> StoreResult<(Vec<FileMetadata>, String)>;

    /// A short-lived signed URL for unauthenticated access.
    async fn presigned_url(
        &self,
        ctx: &Context,
        id: &FileId,
        expires: Duration,
    ) -> StoreResult<String>;

    /// The plain URL (or `file://` path when no base URL is configured).
    async fn url(&self, ctx: &Context, id: &FileId) -> StoreResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_is_deterministic_and_name_sensitive() {
        let a = generate_file_id(b"hello", "x.txt");
        let b = generate_file_id(b"hello", "x.txt");
        let c = generate_file_id(b"hello", "y.txt");
        let d = generate_file_id(b"other", "x.txt");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.as_str().len(), FILE_ID_LENGTH);
    }

    #[test]
    fn file_id_parse_rejects_bad_input() {
        assert!(FileId::parse("0123456789abcdef").is_some());
        assert!(FileId::parse("0123456789ABCDEF").is_none());
        assert!(FileId::parse("0123456789abcde").is_none());
        assert!(FileId::parse("0123456789abcdeg").is_none());
        assert!(FileId::parse("../../../../etc/p").is_none());
    }

    #[test]
    fn content_type_lookup() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("archive.tar"), "application/x-tar");
        assert_eq!(content_type_for("noext"), "");
        assert_eq!(content_type_for("0a1b2c3d4e5f6071"), "");
    }
}
