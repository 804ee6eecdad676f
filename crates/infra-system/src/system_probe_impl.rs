// System probe implementation
// reason: sysinfo for cross-platform disk enumeration
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::Disks;
use tracing::debug;

use convoy_core::port::SystemProbe;

/// System probe implementation using sysinfo
///
/// Free space is read from the mounted volume whose mount point is the
/// longest prefix of the queried path.
pub struct SystemProbeImpl {
    disks: Mutex<Disks>,
}

impl SystemProbeImpl {
    /// Create a new system probe
    ///
    /// # Example
    /// ```ignore
    /// let probe = SystemProbeImpl::new();
    /// ```
    pub fn new() -> Self {
        Self {
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }
}

impl Default for SystemProbeImpl {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute, symlink-resolved form of `path`
///
/// The path itself may not exist yet (e.g. an archive directory that is
/// created on first use), so the nearest existing ancestor is resolved.
fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    for ancestor in absolute.ancestors() {
        if let Ok(resolved) = std::fs::canonicalize(ancestor) {
            let rest = absolute.strip_prefix(ancestor).unwrap_or(Path::new(""));
            return resolved.join(rest);
        }
    }
    absolute
}

/// Index of the mount point that is the longest prefix of `path`
fn best_mount<'a>(path: &Path, mount_points: impl Iterator<Item = &'a Path>) -> Option<usize> {
    mount_points
        .enumerate()
        .filter(|(_, mount)| path.starts_with(mount))
        .max_by_key(|(_, mount)| mount.components().count())
        .map(|(index, _)| index)
}

#[async_trait]
impl SystemProbe for SystemProbeImpl {
    async fn free_space_bytes(&self, path: &Path) -> Option<u64> {
        let target = resolve(path);
        let mut disks = match self.disks.lock() {
            Ok(disks) => disks,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Mounts can change while the daemon runs
        disks.refresh_list();

        let index = best_mount(&target, disks.list().iter().map(|d| d.mount_point()))?;
        let disk = &disks.list()[index];
        let available = disk.available_space();

        debug!(
            path = %target.display(),
            mount_point = %disk.mount_point().display(),
            available_bytes = available,
            "Disk space checked"
        );

        Some(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let mounts = [Path::new("/"), Path::new("/var"), Path::new("/var/lib/data")];

        assert_eq!(
            best_mount(Path::new("/var/lib/data/archive"), mounts.iter().copied()),
            Some(2)
        );
        assert_eq!(
            best_mount(Path::new("/var/log"), mounts.iter().copied()),
            Some(1)
        );
        assert_eq!(best_mount(Path::new("/home"), mounts.iter().copied()), Some(0));
    }

    #[test]
    fn test_prefix_is_component_based() {
        let mounts = [Path::new("/"), Path::new("/var")];
        // "/variable" is not under "/var"
        assert_eq!(
            best_mount(Path::new("/variable"), mounts.iter().copied()),
            Some(0)
        );
        assert_eq!(best_mount(Path::new("/x"), [Path::new("/y")].into_iter()), None);
    }

    #[test]
    fn test_resolve_missing_path_keeps_tail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("archive").join("jobs");

        let resolved = resolve(&missing);

        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("archive/jobs"));
    }

    #[tokio::test]
    async fn test_free_space_for_temp_dir() {
        let probe = SystemProbeImpl::new();
        let dir = tempfile::tempdir().unwrap();

        // Containers may expose no disks at all; just verify it doesn't panic
        let _available = probe.free_space_bytes(dir.path()).await;
    }
}
