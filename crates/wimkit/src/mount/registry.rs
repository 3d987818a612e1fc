//! Tracking of active mounts.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use wimkit_common::{MountId, WimError, WimResult};

use super::record::{MountStatus, MountedWindowsImage};
use super::state::MountStateStore;
use crate::imaging::{DismApi, NativeImageService, ProgressSink, UnmountOutcome};

/// What to mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Source container.
    pub image_path: PathBuf,
    /// 1-based image index.
    pub index: u32,
    /// Target directory.
    pub mount_path: PathBuf,
    /// Mount read-only.
    pub read_only: bool,
}

/// Produces [`MountedWindowsImage`] records and keeps at most one active
/// record per mount path.
///
/// Mount paths are compared after resolution, so relative, absolute and
/// `..` spellings of one directory collide. The state store is best effort
/// once the native call has run: a failed save or delete is logged and the
/// in-memory view stays authoritative.
#[derive(Debug, Default)]
pub struct MountRegistry {
    active: HashMap<PathBuf, MountedWindowsImage>,
    store: Option<MountStateStore>,
}

impl MountRegistry {
    /// An in-memory registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry persisted in `store`, reloading its active records.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be read.
    pub fn with_store(store: MountStateStore) -> WimResult<Self> {
        let mut active = HashMap::new();
        for record in store.load_all()? {
            if record.status().is_terminal() {
                store.delete(record.mount_id())?;
                continue;
            }
            active.insert(path_key(record.mount_path()), record);
        }
        tracing::debug!(count = active.len(), "Loaded tracked mounts");
        Ok(Self {
            active,
            store: Some(store),
        })
    }

    /// Mount `request` through `service` and return the new record.
    ///
    /// A path already referenced by a tracked mount fails fast without
    /// touching the native layer.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::MountPathInUse`] on collision, otherwise the
    /// service's error.
    pub fn mount<A: DismApi>(
        &mut self,
        service: &NativeImageService<A>,
        request: &MountRequest,
        progress: Option<&dyn ProgressSink>,
    ) -> WimResult<MountedWindowsImage> {
        let mount_path = absolute_path(&request.mount_path);
        if self.active.contains_key(&path_key(&mount_path)) {
            return Err(WimError::MountPathInUse {
                path: request.mount_path.clone(),
            });
        }

        tracing::debug!(
            mount = %mount_path.display(),
            status = %MountStatus::MountRequested,
            "Mount requested"
        );
        if let Err(err) = service.mount(
            &request.image_path,
            &mount_path,
            request.index,
            request.read_only,
            progress,
        ) {
            tracing::debug!(
                mount = %mount_path.display(),
                status = %MountStatus::MountFailed,
                "Mount failed"
            );
            return Err(err);
        }

        let record = MountedWindowsImage::mounted(
            request.image_path.clone(),
            request.index,
            mount_path,
            request.read_only,
        );
        self.track(&record);
        tracing::info!(
            mount_id = %record.mount_id(),
            mount = %record.mount_path().display(),
            "Mount tracked"
        );
        Ok(record)
    }

    /// Unmount `record` through `service`, advancing its status.
    ///
    /// On success the record stops being tracked. On failure it stays
    /// tracked as `UnmountFailed` and may be unmounted again.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::InvalidTransition`] for a record that is not
    /// mounted, otherwise the service's error.
    pub fn unmount<A: DismApi>(
        &mut self,
        service: &NativeImageService<A>,
        record: &mut MountedWindowsImage,
        commit: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> WimResult<UnmountOutcome> {
        record.advance(MountStatus::UnmountRequested)?;
        self.track(record);

        match service.unmount(record.mount_path(), commit, progress) {
            Ok(outcome) => {
                record.advance(outcome.into())?;
                self.untrack(record);
                if outcome == UnmountOutcome::DiscardedAfterBusyRetry {
                    tracing::warn!(
                        mount_id = %record.mount_id(),
                        requested_commit = commit,
                        "Mount was discarded after a busy retry"
                    );
                }
                Ok(outcome)
            }
            Err(err) => {
                record.advance(MountStatus::UnmountFailed)?;
                self.track(record);
                Err(err)
            }
        }
    }

    /// The tracked record at `mount_path`.
    #[must_use]
    pub fn find_by_path(&self, mount_path: &Path) -> Option<&MountedWindowsImage> {
        self.active.get(&path_key(mount_path))
    }

    /// The tracked record with `mount_id`.
    #[must_use]
    pub fn find_by_id(&self, mount_id: MountId) -> Option<&MountedWindowsImage> {
        self.active.values().find(|r| r.mount_id() == mount_id)
    }

    /// Every tracked record.
    pub fn active(&self) -> impl Iterator<Item = &MountedWindowsImage> {
        self.active.values()
    }

    /// Stop tracking `mount_path`, e.g. after manual recovery of a failed
    /// unmount. Returns the dropped record.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::NotMounted`] if nothing is tracked there.
    pub fn forget(&mut self, mount_path: &Path) -> WimResult<MountedWindowsImage> {
        let record = self
            .active
            .remove(&path_key(mount_path))
            .ok_or_else(|| WimError::NotMounted {
                path: mount_path.to_path_buf(),
            })?;
        if let Some(store) = &self.store {
            store.delete(record.mount_id())?;
        }
        tracing::info!(mount_id = %record.mount_id(), "Mount forgotten");
        Ok(record)
    }

    fn track(&mut self, record: &MountedWindowsImage) {
        self.active
            .insert(path_key(record.mount_path()), record.clone());
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.save(record) {
            tracing::warn!(
                mount_id = %record.mount_id(),
                status = %record.status(),
                error = %err,
                "Failed to persist mount state"
            );
        }
    }

    fn untrack(&mut self, record: &MountedWindowsImage) {
        self.active.remove(&path_key(record.mount_path()));
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.delete(record.mount_id()) {
            tracing::warn!(
                mount_id = %record.mount_id(),
                error = %err,
                "Failed to delete mount state"
            );
        }
    }
}

/// `path` made absolute against the working directory, with `.` and `..`
/// folded lexically.
fn absolute_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut folded = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                folded.pop();
            }
            other => folded.push(other),
        }
    }
    folded
}

/// Comparison key for mount paths.
///
/// Existing prefixes are canonicalized so symlinked spellings agree. The
/// rest stays lexical: the directory may not exist until the mount creates
/// it.
fn path_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if let Ok(canonical) = resolved.canonicalize() {
                    resolved = canonical;
                }
            }
            other => resolved.push(other),
        }
    }
    if cfg!(windows) {
        let text = resolved.to_string_lossy();
        let text = match text.strip_prefix(r"\\?\UNC\") {
            Some(share) => format!(r"\\{share}"),
            None => text.strip_prefix(r"\\?\").unwrap_or(&text).to_string(),
        };
        PathBuf::from(text.to_lowercase())
    } else {
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_keys_ignore_trailing_separators() {
        assert_eq!(path_key(Path::new("/mnt/a/1/")), path_key(Path::new("/mnt/a/1")));
        assert_eq!(path_key(Path::new("/mnt/./a/1")), path_key(Path::new("/mnt/a/1")));
    }

    #[test]
    fn path_keys_resolve_parent_components_and_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        let real = temp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let key = path_key(&real.join("mnt"));

        assert_eq!(path_key(&temp.path().join("gone/../real/mnt")), key);
        #[cfg(unix)]
        {
            let link = temp.path().join("link");
            std::os::unix::fs::symlink(&real, &link).unwrap();
            assert_eq!(path_key(&link.join("mnt")), key);
        }
    }

    #[test]
    fn folded_absolute_path() {
        let folded = absolute_path(Path::new("/mnt/./a/../b/1"));
        assert!(folded.is_absolute());
        assert!(folded.ends_with("mnt/b/1"));
    }

    #[test]
    fn forget_unknown_path_fails() {
        let mut registry = MountRegistry::new();
        assert!(matches!(
            registry.forget(Path::new("/mnt/none")),
            Err(WimError::NotMounted { .. })
        ));
    }

    #[test]
    fn store_backed_registry_drops_terminal_records() {
        let temp = tempfile::tempdir().unwrap();
        let store = MountStateStore::new(temp.path());

        let live = MountedWindowsImage::mounted("a.wim".into(), 1, "/mnt/live".into(), false);
        let mut done = MountedWindowsImage::mounted("a.wim".into(), 2, "/mnt/done".into(), false);
        done.advance(MountStatus::UnmountRequested).unwrap();
        done.advance(MountStatus::Committed).unwrap();
        store.save(&live).unwrap();
        store.save(&done).unwrap();

        let registry = MountRegistry::with_store(store.clone()).unwrap();

        assert_eq!(registry.active().count(), 1);
        assert_eq!(
            registry.find_by_path(Path::new("/mnt/live")).map(MountedWindowsImage::mount_id),
            Some(live.mount_id())
        );
        assert!(registry.find_by_id(done.mount_id()).is_none());
        assert!(!store.state_path(done.mount_id()).exists());
    }
}
