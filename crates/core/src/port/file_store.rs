// File Store Port
// The filesystem boundary for job-referenced files and archive/backup artifacts

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Filesystem operations used by the cleanup engine
///
/// Implementations:
/// - TokioFileStore (infra-system): real filesystem
/// - InMemoryFileStore: tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Size in bytes, or None if the file does not exist
    async fn stat(&self, path: &Path) -> Result<Option<u64>>;

    /// Delete a file
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Move a file, replacing the destination
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Write (create or truncate) a file
    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Create a directory and all missing parents
    async fn create_dir_all(&self, path: &Path) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// In-memory filesystem; directories are tracked but not required
    #[derive(Default)]
    pub struct InMemoryFileStore {
        files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
        dirs: Mutex<BTreeSet<PathBuf>>,
        fail_writes: Mutex<bool>,
    }

    impl InMemoryFileStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a file of `size` zero bytes
        pub fn with_file(self, path: impl Into<PathBuf>, size: usize) -> Self {
            self.files.lock().unwrap().insert(path.into(), vec![0; size]);
            self
        }

        /// Make every subsequent write fail (e.g. disk full)
        pub fn set_fail_writes(&self, fail: bool) {
            *self.fail_writes.lock().unwrap() = fail;
        }

        pub fn exists(&self, path: impl AsRef<Path>) -> bool {
            self.files.lock().unwrap().contains_key(path.as_ref())
        }

        pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(path.as_ref()).cloned()
        }

        pub fn paths(&self) -> Vec<PathBuf> {
            self.files.lock().unwrap().keys().cloned().collect()
        }
    }

    fn not_found(path: &Path) -> AppError {
        AppError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        ))
    }

    #[async_trait]
    impl FileStore for InMemoryFileStore {
        async fn stat(&self, path: &Path) -> Result<Option<u64>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(path)
                .map(|data| data.len() as u64))
        }

        async fn remove(&self, path: &Path) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| not_found(path))
        }

        async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
            let mut files = self.files.lock().unwrap();
            let data = files.remove(from).ok_or_else(|| not_found(from))?;
            files.insert(to.to_path_buf(), data);
            Ok(())
        }

        async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
            if *self.fail_writes.lock().unwrap() {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no space left on device",
                )));
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), contents.to_vec());
            Ok(())
        }

        async fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.dirs.lock().unwrap().insert(path.to_path_buf());
            Ok(())
        }
    }
}
