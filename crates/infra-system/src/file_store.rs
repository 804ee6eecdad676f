// File store implementation
// reason: tokio::fs keeps file I/O off the runtime worker threads
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use convoy_core::port::FileStore;
use convoy_core::Result;

/// Real filesystem adapter
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFileStore;

impl TokioFileStore {
    pub fn new() -> Self {
        Self
    }
}

/// `rename(2)` cannot cross filesystems; archives often live on another volume
fn is_cross_device(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::CrossesDevices
}

#[async_trait]
impl FileStore for TokioFileStore {
    async fn stat(&self, path: &Path) -> Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        debug!(path = %path.display(), "File removed");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        match tokio::fs::rename(from, to).await {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                tokio::fs::copy(from, to).await?;
                tokio::fs::remove_file(from).await?;
            }
            Err(e) => return Err(e.into()),
        }
        debug!(from = %from.display(), to = %to.display(), "File moved");
        Ok(())
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stat_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokioFileStore::new();

        assert_eq!(store.stat(&dir.path().join("nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_stat_rename_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokioFileStore::new();
        let source = dir.path().join("out.pdf");
        let target = dir.path().join("archive").join("files").join("out.pdf");

        store.write(&source, b"12345").await.unwrap();
        assert_eq!(store.stat(&source).await.unwrap(), Some(5));

        store
            .create_dir_all(target.parent().unwrap())
            .await
            .unwrap();
        store.rename(&source, &target).await.unwrap();
        assert_eq!(store.stat(&source).await.unwrap(), None);
        assert_eq!(store.stat(&target).await.unwrap(), Some(5));

        store.remove(&target).await.unwrap();
        assert_eq!(store.stat(&target).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokioFileStore::new();

        assert!(store.remove(&dir.path().join("ghost")).await.is_err());
    }

    #[test]
    fn test_cross_device_detection() {
        assert!(is_cross_device(&std::io::Error::from(ErrorKind::CrossesDevices)));
        assert!(!is_cross_device(&std::io::Error::from(ErrorKind::NotFound)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_exdev_maps_to_cross_device() {
        assert!(is_cross_device(&std::io::Error::from_raw_os_error(18)));
    }
}
