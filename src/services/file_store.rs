//! Local filesystem access for statement files.

use async_trait::async_trait;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::ports::FileStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read_to_string(&self, path: &str) -> PipelineResult<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::file_access(path, e.to_string()))
    }

    async fn remove(&self, path: &str) -> PipelineResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| PipelineError::file_access(path, e.to_string()))
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("select.sql");
        std::fs::write(&path, "SELECT 1").unwrap();
        let path = path.to_str().unwrap();

        let store = LocalFileStore::new();
        assert!(store.exists(path).await);
        assert_eq!(store.read_to_string(path).await.unwrap(), "SELECT 1");

        store.remove(path).await.unwrap();
        assert!(!store.exists(path).await);
    }

    #[tokio::test]
    async fn test_missing_file_is_file_access_error() {
        let store = LocalFileStore::new();
        let err = store
            .read_to_string("/nonexistent/filings/none.sql")
            .await
            .unwrap_err();
        assert_eq!(err.category(), "file_access");
        assert!(store.remove("/nonexistent/filings/none.sql").await.is_err());
    }
}
