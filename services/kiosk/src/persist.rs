//! Small JSON documents kept on the kiosk's disk
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write leaves either the old document or the new one. A document
//! that cannot be read or parsed is reported as absent.

use std::{
    io::ErrorKind,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::error::KioskResult;

#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _document: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _document: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored document, or `None` when missing or corrupt
    pub async fn read(&self) -> Option<T> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice(&content) {
            Ok(document) => Some(document),
            Err(e) => {
                warn!("Ignoring corrupt {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub async fn write(&self, document: &T) -> KioskResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let content = serde_json::to_vec_pretty(document)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!("Wrote {}", self.path.display());
        Ok(())
    }

    /// Remove the document; a missing file is not an error
    pub async fn clear(&self) -> KioskResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Cleared {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::<Doc>::new(dir.path().join("nested/doc.json"));

        assert_eq!(file.read().await, None);
        let doc = Doc {
            name: "pc-12".into(),
            count: 3,
        };
        file.write(&doc).await.unwrap();

        assert_eq!(file.read().await, Some(doc));
        assert!(!dir.path().join("nested/doc.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        tokio::fs::write(&path, b"{\"name\": \"pc-").await.unwrap();

        let file = JsonFile::<Doc>::new(&path);
        assert_eq!(file.read().await, None);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::<Doc>::new(dir.path().join("doc.json"));
        file.write(&Doc {
            name: "x".into(),
            count: 0,
        })
        .await
        .unwrap();

        file.clear().await.unwrap();
        file.clear().await.unwrap();
        assert_eq!(file.read().await, None);
    }
}
