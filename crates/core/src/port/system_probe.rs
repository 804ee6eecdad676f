// System resource monitoring port
use async_trait::async_trait;
use std::path::Path;

/// System probe port for disk space checks
///
/// Used by the cleanup service to warn when the archive volume runs low
#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Available bytes on the volume holding `path`
    ///
    /// # Returns
    /// None if no mounted volume could be matched
    async fn free_space_bytes(&self, path: &Path) -> Option<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Mock SystemProbe reporting a fixed amount of free space
    pub struct MockSystemProbe {
        free_bytes: Mutex<Option<u64>>,
    }

    impl MockSystemProbe {
        pub fn new(free_bytes: Option<u64>) -> Self {
            Self {
                free_bytes: Mutex::new(free_bytes),
            }
        }

        /// Plenty of room
        pub fn unlimited() -> Self {
            Self::new(Some(u64::MAX))
        }

        pub fn set_free_bytes(&self, free_bytes: Option<u64>) {
            *self.free_bytes.lock().unwrap() = free_bytes;
        }
    }

    #[async_trait]
    impl SystemProbe for MockSystemProbe {
        async fn free_space_bytes(&self, _path: &Path) -> Option<u64> {
            *self.free_bytes.lock().unwrap()
        }
    }
}
