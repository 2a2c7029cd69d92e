//! Local storage for downloaded `.osu` source files.
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use crate::error::Result;

#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn store(&self, bytes: &[u8], path: &str) -> Result<()>;

    /// `None` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting a missing file succeeds.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Relative storage path of a submission's source file.
pub fn source_file_path(id: i64) -> String {
    format!("{}.osu", id)
}

/// Files rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, bytes: &[u8], path: &str) -> Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Write beside the target and rename so readers never see half a file.
        let staging = target.with_extension("part");
        fs::write(&staging, bytes).await?;
        fs::rename(&staging, &target).await?;
        debug!(path = %target.display(), size = bytes.len(), "stored file");
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
