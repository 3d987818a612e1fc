//! Mount directory allocation and stale-directory cleanup.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;
use wimkit_common::{ImageGuid, WimResult};

/// Default age after which an empty mount directory is stale.
pub const DEFAULT_STALE_HOURS: u64 = 24;

/// Result of a cleanup sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Directories deleted.
    pub removed: Vec<PathBuf>,
    /// Old directories kept because they still contain files.
    pub retained: Vec<PathBuf>,
    /// Directories that could not be inspected or deleted.
    pub failed: Vec<PathBuf>,
}

/// Hands out `root/<image-guid>/<index>` mount directories.
#[derive(Debug, Clone)]
pub struct MountDirectoryAllocator {
    root: PathBuf,
}

impl MountDirectoryAllocator {
    /// Allocate under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The allocation root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for image `index` of the container identified by `guid`.
    ///
    /// Without a `guid` a fresh one is generated, so the path is unique.
    /// The same `guid` and `index` always yield the same path.
    #[must_use]
    pub fn path_for(&self, image_index: u32, guid: Option<ImageGuid>) -> PathBuf {
        let guid = guid.unwrap_or_else(ImageGuid::generate);
        self.root
            .join(guid.dir_name())
            .join(image_index.to_string())
    }

    /// Compute the mount directory and create it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn allocate(&self, image_index: u32, guid: Option<ImageGuid>) -> WimResult<PathBuf> {
        let path = self.path_for(image_index, guid);
        std::fs::create_dir_all(&path)?;
        tracing::debug!(path = %path.display(), image_index, "Allocated mount directory");
        Ok(path)
    }

    /// Delete immediate subdirectories older than `older_than_hours` whose
    /// subtree holds no files.
    ///
    /// Per-directory errors are logged and skipped. Must not run while an
    /// image is mounted under the root.
    #[must_use]
    pub fn cleanup(&self, older_than_hours: u64) -> CleanupReport {
        let mut report = CleanupReport::default();
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(older_than_hours.saturating_mul(3600)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(root = %self.root.display(), error = %err, "Mount root not readable");
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            match sweep(&path, cutoff) {
                Ok(Sweep::Young) => {}
                Ok(Sweep::Removed) => {
                    tracing::info!(path = %path.display(), "Removed stale mount directory");
                    report.removed.push(path);
                }
                Ok(Sweep::Populated) => {
                    tracing::debug!(path = %path.display(), "Stale mount directory still has files");
                    report.retained.push(path);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Failed to clean mount directory");
                    report.failed.push(path);
                }
            }
        }

        report
    }
}

enum Sweep {
    Young,
    Removed,
    Populated,
}

fn sweep(dir: &Path, cutoff: SystemTime) -> std::io::Result<Sweep> {
    let metadata = std::fs::symlink_metadata(dir)?;
    if !metadata.is_dir() {
        return Ok(Sweep::Young);
    }
    let born = metadata.created().or_else(|_| metadata.modified())?;
    if born >= cutoff {
        return Ok(Sweep::Young);
    }

    for entry in WalkDir::new(dir).min_depth(1) {
        if !entry.map_err(std::io::Error::from)?.file_type().is_dir() {
            return Ok(Sweep::Populated);
        }
    }

    std::fs::remove_dir_all(dir)?;
    Ok(Sweep::Removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_creates_guid_index_layout() {
        let temp = tempdir().unwrap();
        let allocator = MountDirectoryAllocator::new(temp.path());

        let path = allocator.allocate(1, None).unwrap();

        assert!(path.is_dir());
        assert_eq!(path.file_name().unwrap(), "1");
        let guid_dir = path.parent().unwrap();
        assert_eq!(guid_dir.parent().unwrap(), temp.path());
        assert!(
            guid_dir
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .parse::<ImageGuid>()
                .is_ok()
        );
    }

    #[test]
    fn explicit_guid_is_stable() {
        let temp = tempdir().unwrap();
        let allocator = MountDirectoryAllocator::new(temp.path());
        let guid = ImageGuid::generate();

        let inspect = allocator.allocate(2, Some(guid)).unwrap();
        let customize = allocator.allocate(2, Some(guid)).unwrap();
        let other_index = allocator.allocate(3, Some(guid)).unwrap();

        assert_eq!(inspect, customize);
        assert_ne!(inspect, other_index);
        assert_eq!(inspect.parent(), other_index.parent());
    }

    #[test]
    fn cleanup_only_removes_empty_trees() {
        let temp = tempdir().unwrap();
        let allocator = MountDirectoryAllocator::new(temp.path());

        let empty = allocator.allocate(1, None).unwrap();
        std::fs::create_dir_all(empty.join("Windows/System32")).unwrap();
        let populated = allocator.allocate(1, None).unwrap();
        std::fs::write(populated.join("leftover.txt"), b"x").unwrap();

        let report = allocator.cleanup(0);

        assert!(!empty.parent().unwrap().exists());
        assert!(populated.join("leftover.txt").exists());
        assert_eq!(report.removed, vec![empty.parent().unwrap().to_path_buf()]);
        assert_eq!(report.retained, vec![populated.parent().unwrap().to_path_buf()]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn cleanup_keeps_young_directories() {
        let temp = tempdir().unwrap();
        let allocator = MountDirectoryAllocator::new(temp.path());
        let fresh = allocator.allocate(1, None).unwrap();

        let report = allocator.cleanup(DEFAULT_STALE_HOURS);

        assert!(fresh.exists());
        assert_eq!(report, CleanupReport::default());
    }

    #[test]
    fn cleanup_of_missing_root_is_a_no_op() {
        let temp = tempdir().unwrap();
        let allocator = MountDirectoryAllocator::new(temp.path().join("missing"));
        assert_eq!(allocator.cleanup(0), CleanupReport::default());
    }

    proptest::proptest! {
        #[test]
        fn distinct_guids_never_collide(index in 0u32..64, a in proptest::array::uniform16(0u8..), b in proptest::array::uniform16(0u8..)) {
            proptest::prop_assume!(a != b);
            let allocator = MountDirectoryAllocator::new("/mounts");
            let first = allocator.path_for(index, Some(ImageGuid::from_uuid(uuid::Uuid::from_bytes(a))));
            let second = allocator.path_for(index, Some(ImageGuid::from_uuid(uuid::Uuid::from_bytes(b))));
            proptest::prop_assert_ne!(first, second);
        }

        #[test]
        fn same_guid_and_index_is_identical(index in 0u32..64, a in proptest::array::uniform16(0u8..)) {
            let allocator = MountDirectoryAllocator::new("/mounts");
            let guid = ImageGuid::from_uuid(uuid::Uuid::from_bytes(a));
            proptest::prop_assert_eq!(allocator.path_for(index, Some(guid)), allocator.path_for(index, Some(guid)));
        }
    }
}
