/// Developer-facing facade over a [`FileStore`].
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::files::{FileId, FileMetadata, FileStore};
use crate::pagination::{CursorResult, Paginator};

/// File operations with the framework's pagination types.
#[derive(Clone)]
pub struct FileRepository {
    store: Arc<dyn FileStore>,
    paginator: Paginator,
}

impl FileRepository {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            paginator: Paginator::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn FileStore> {
        Arc::clone(&self.store)
    }

    /// Store a stream under `name`.
    pub async fn save(
        &self,
        ctx: &Context,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<(FileId, FileMetadata)> {
        self.store.store(ctx, name, reader).await
    }

    /// Store an in-memory buffer.
    pub async fn save_bytes(
        &self,
        ctx: &Context,
        name: &str,
        content: &[u8],
    ) -> StoreResult<(FileId, FileMetadata)> {
        let mut reader = content;
        self.store.store(ctx, name, &mut reader).await
    }

    /// Store a local file, named after its basename.
    pub async fn save_path(&self, ctx: &Context, path: &Path) -> StoreResult<(FileId, FileMetadata)> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::validation("path has no file name"))?;
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StoreError::driver("filesystem", "open", e))?;
        self.store.store(ctx, &name, &mut file).await
    }

    /// Open a stored file for reading.
    pub async fn get(
        &self,
        ctx: &Context,
        id: &FileId,
    ) -> StoreResult<(Box<dyn AsyncRead + Send + Unpin>, FileMetadata)> {
        self.store.retrieve(ctx, id).await
    }

    pub async fn delete(&self, ctx: &Context, id: &FileId) -> StoreResult<()> {
        self.store.delete(ctx, id).await
    }

    pub async fn exists(&self, ctx: &Context, id: &FileId) -> StoreResult<bool> {
        self.store.exists(ctx, id).await
    }

    pub async fn metadata(&self, ctx: &Context, id: &FileId) -> StoreResult<FileMetadata> {
        self.store.metadata(ctx, id).await
    }

    /// List stored files. The cursor is the backend's page token, carried
    /// through the standard result shape; the total is unknown.
    pub async fn list(
        &self,
        ctx: &Context,
        page_size: i32,
        cursor: &str,
    ) -> StoreResult<CursorResult<FileMetadata>> {
        let params = self.paginator.parse_params(page_size, cursor);
        let (items, next_token) = self
            .store
            .list(ctx, params.page_size, &params.cursor)
            .await?;

        let has_more = !next_token.is_empty();
        Ok(CursorResult {
            items,
            next_cursor: next_token,
            prev_cursor: String::new(),
            has_more,
            total_count: -1,
        })
    }

    pub async fn url(&self, ctx: &Context, id: &FileId) -> StoreResult<String> {
        self.store.url(ctx, id).await
    }

    pub async fn presigned_url(
        &self,
        ctx: &Context,
        id: &FileId,
        expiration: Duration,
    ) -> StoreResult<String> {
        self.store.presigned_url(ctx, id, expiration).await
    }
}

/// Open a filesystem-backed file repository from the unified config
/// (`type = "filesystem"`).
pub async fn open(config: &crate::config::StoreConfig) -> StoreResult<FileRepository> {
    config.validate()?;
    let fs_config = crate::files::FilesystemConfig::from_store_config(config);
    let store = crate::files::FilesystemStore::new(fs_config)?;
    Ok(FileRepository::new(Arc::new(store)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::files::FilesystemConfig;
    use crate::files::FilesystemStore;
    use tempfile::tempdir;

    fn repository(root: &Path) -> FileRepository {
        let store = FilesystemStore::new(FilesystemConfig {
            root: root.to_path_buf(),
            ..FilesystemConfig::default()
        })
        .unwrap();
        FileRepository::new(Arc::new(store))
    }

    #[tokio::test]
    async fn save_bytes_and_list() {
        let dir = tempdir().unwrap();
        let repo = repository(dir.path());
        let ctx = Context::background();

        let (id, meta) = repo.save_bytes(&ctx, "note.txt", b"jotted down").await.unwrap();
        assert_eq!(meta.size, 11);
        assert!(repo.exists(&ctx, &id).await.unwrap());

        let result = repo.list(&ctx, 10, "").await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert!(!result.has_more);
        assert_eq!(result.total_count, -1);
    }

    #[tokio::test]
    async fn save_path_uses_basename() {
        let dir = tempdir().unwrap();
        let repo = repository(dir.path());
        let ctx = Context::background();

        let source = dir.path().join("source.csv");
        std::fs::write(&source, b"a,b\n1,2\n").unwrap();

        let (id, _) = repo.save_path(&ctx, &source).await.unwrap();
        let (_, by_bytes) = repo.save_bytes(&ctx, "source.csv", b"a,b\n1,2\n").await.unwrap();
        assert_eq!(id.as_str(), by_bytes.path);
    }

    #[tokio::test]
    async fn open_from_unified_config() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::filesystem(dir.path().to_str().unwrap());
        let repo = open(&config).await.unwrap();

        let ctx = Context::background();
        let (id, _) = repo.save_bytes(&ctx, "x.bin", &[1, 2, 3]).await.unwrap();
        assert!(repo.exists(&ctx, &id).await.unwrap());
    }
}
