//! Backup-then-elevate ownership service.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{SecurityApi, SecurityBackup};

/// Outcome of [`OwnershipElevationService::restore_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Paths whose original descriptor was re-applied.
    pub restored: Vec<PathBuf>,
    /// Paths whose restoration failed.
    pub failed: Vec<PathBuf>,
}

/// Outcome of [`OwnershipElevationService::take_ownership_recursive`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecursiveReport {
    /// Paths elevated.
    pub elevated: usize,
    /// Paths that could not be elevated.
    pub skipped: usize,
}

/// Takes ownership of protected paths and restores them afterwards.
///
/// Each elevated path gets one [`SecurityBackup`], captured before the
/// first mutation. [`restore_all`](Self::restore_all) re-applies them and
/// runs when the service is dropped. Do not share an instance between
/// unrelated sessions: restoration covers the whole instance.
///
/// If the process dies before restoration the paths stay elevated.
#[derive(Debug)]
pub struct OwnershipElevationService<S: SecurityApi> {
    api: S,
    backups: HashMap<PathBuf, SecurityBackup>,
}

impl<S: SecurityApi> OwnershipElevationService<S> {
    /// Create a service over `api`.
    pub fn new(api: S) -> Self {
        Self {
            api,
            backups: HashMap::new(),
        }
    }

    /// The security backend.
    pub const fn api(&self) -> &S {
        &self.api
    }

    /// Number of backups awaiting restoration.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.backups.len()
    }

    /// The backup captured for `path`, if any.
    #[must_use]
    pub fn backup_for(&self, path: &Path) -> Option<&SecurityBackup> {
        self.backups.get(path)
    }

    /// Make the current identity owner of `path` and grant it full control.
    ///
    /// The original descriptor is backed up first; a failed backup is
    /// logged and elevation proceeds anyway. Returns `false` if either
    /// mutation fails, so bulk callers can skip the path.
    pub fn take_ownership_and_grant_access(&mut self, path: &Path) -> bool {
        let is_directory = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata.is_dir(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Cannot elevate missing path");
                return false;
            }
        };

        if !self.backups.contains_key(path) {
            match self.api.capture(path) {
                Ok(original) => {
                    self.backups.insert(
                        path.to_path_buf(),
                        SecurityBackup {
                            path: path.to_path_buf(),
                            is_directory,
                            original,
                        },
                    );
                }
                Err(err) => tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Failed to back up security descriptor; elevating without a backup"
                ),
            }
        }

        let owned = self
            .api
            .take_ownership(path)
            .inspect_err(|err| {
                tracing::warn!(path = %path.display(), error = %err, "Failed to take ownership");
            })
            .is_ok();
        let granted = self
            .api
            .grant_full_control(path, is_directory)
            .inspect_err(|err| {
                tracing::warn!(path = %path.display(), error = %err, "Failed to grant full control");
            })
            .is_ok();

        if owned && granted {
            tracing::debug!(path = %path.display(), is_directory, "Elevated path");
        }
        owned && granted
    }

    /// Elevate `root` and everything beneath it, parents before children.
    pub fn take_ownership_recursive(&mut self, root: &Path) -> RecursiveReport {
        let mut report = RecursiveReport::default();
        for entry in WalkDir::new(root).follow_links(false) {
            match entry {
                Ok(entry) => {
                    if self.take_ownership_and_grant_access(entry.path()) {
                        report.elevated += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping unreadable path");
                    report.skipped += 1;
                }
            }
        }
        tracing::info!(
            root = %root.display(),
            elevated = report.elevated,
            skipped = report.skipped,
            "Recursive elevation finished"
        );
        report
    }

    /// Re-apply every captured backup, then forget them all.
    ///
    /// Failures are logged and do not stop the remaining restorations.
    /// Each backup is attempted at most once.
    pub fn restore_all(&mut self) -> RestoreReport {
        let mut report = RestoreReport::default();
        for (path, backup) in self.backups.drain() {
            match self.api.apply(&path, &backup.original) {
                Ok(()) => report.restored.push(path),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Failed to restore security descriptor"
                    );
                    report.failed.push(path);
                }
            }
        }
        if !report.restored.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                restored = report.restored.len(),
                failed = report.failed.len(),
                "Restored elevated paths"
            );
        }
        report
    }

    /// Forget every backup without re-applying it. The paths stay elevated.
    pub fn clear_backups(&mut self) -> Vec<SecurityBackup> {
        let cleared: Vec<SecurityBackup> = self.backups.drain().map(|(_, b)| b).collect();
        if !cleared.is_empty() {
            tracing::warn!(count = cleared.len(), "Cleared security backups without restoring");
        }
        cleared
    }

    /// Guard that restores every backup when dropped, unwinding included.
    pub fn scope(&mut self) -> ElevationScope<'_, S> {
        ElevationScope { service: self }
    }
}

impl<S: SecurityApi> Drop for OwnershipElevationService<S> {
    fn drop(&mut self) {
        self.restore_all();
    }
}

/// Scoped batch of elevations; see [`OwnershipElevationService::scope`].
#[derive(Debug)]
pub struct ElevationScope<'a, S: SecurityApi> {
    service: &'a mut OwnershipElevationService<S>,
}

impl<S: SecurityApi> Deref for ElevationScope<'_, S> {
    type Target = OwnershipElevationService<S>;

    fn deref(&self) -> &Self::Target {
        self.service
    }
}

impl<S: SecurityApi> DerefMut for ElevationScope<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.service
    }
}

impl<S: SecurityApi> Drop for ElevationScope<'_, S> {
    fn drop(&mut self) {
        self.service.restore_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SecurityDescriptor;
    use parking_lot::Mutex;
    use wimkit_common::{WimError, WimResult};

    /// In-memory descriptors keyed by path.
    #[derive(Default)]
    struct FakeSecurity {
        descriptors: Mutex<HashMap<PathBuf, String>>,
        fail_capture: bool,
        fail_owner: bool,
        fail_apply_for: Option<PathBuf>,
        applied: Mutex<Vec<PathBuf>>,
    }

    impl FakeSecurity {
        fn set(&self, path: &Path, sd: &str) {
            self.descriptors.lock().insert(path.to_path_buf(), sd.to_string());
        }

        fn get(&self, path: &Path) -> String {
            self.descriptors.lock().get(path).cloned().unwrap_or_default()
        }
    }

    fn denied(op: &str) -> WimError {
        WimError::PermissionDenied {
            operation: op.to_string(),
        }
    }

    impl SecurityApi for FakeSecurity {
        fn capture(&self, path: &Path) -> WimResult<SecurityDescriptor> {
            if self.fail_capture {
                return Err(denied("capture"));
            }
            Ok(SecurityDescriptor::new(self.get(path)))
        }

        fn take_ownership(&self, path: &Path) -> WimResult<()> {
            if self.fail_owner {
                return Err(denied("take ownership"));
            }
            let current = self.get(path);
            let dacl = current.find("D:").map_or("", |at| &current[at..]);
            self.set(path, &format!("O:ME{dacl}"));
            Ok(())
        }

        fn grant_full_control(&self, path: &Path, _is_directory: bool) -> WimResult<()> {
            let current = self.get(path);
            self.set(path, &format!("{current}(A;;FA;;;ME)"));
            Ok(())
        }

        fn apply(&self, path: &Path, descriptor: &SecurityDescriptor) -> WimResult<()> {
            self.applied.lock().push(path.to_path_buf());
            if self.fail_apply_for.as_deref() == Some(path) {
                return Err(denied("apply"));
            }
            self.set(path, descriptor.as_str());
            Ok(())
        }
    }

    const TRUSTED_INSTALLER: &str = "O:S-1-5-80-956008885D:PAI(A;;FA;;;S-1-5-80-956008885)";

    fn protected_file(dir: &Path, name: &str, api: &FakeSecurity) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"protected").unwrap();
        api.set(&path, TRUSTED_INSTALLER);
        path
    }

    #[test]
    fn elevation_round_trip_restores_exact_descriptor() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = OwnershipElevationService::new(FakeSecurity::default());
        let file = protected_file(temp.path(), "ntoskrnl.exe", service.api());
        let before = service.api().capture(&file).unwrap();

        assert!(service.take_ownership_and_grant_access(&file));
        assert_ne!(service.api().capture(&file).unwrap(), before);

        let report = service.restore_all();
        assert_eq!(report.restored, vec![file.clone()]);
        assert_eq!(service.api().capture(&file).unwrap(), before);
        assert_eq!(service.pending(), 0);
    }

    #[test]
    fn second_elevation_keeps_first_backup() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = OwnershipElevationService::new(FakeSecurity::default());
        let file = protected_file(temp.path(), "hal.dll", service.api());

        assert!(service.take_ownership_and_grant_access(&file));
        assert!(service.take_ownership_and_grant_access(&file));

        assert_eq!(service.pending(), 1);
        assert_eq!(
            service.backup_for(&file).unwrap().original.as_str(),
            TRUSTED_INSTALLER
        );
    }

    #[test]
    fn backup_failure_does_not_block_elevation() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = OwnershipElevationService::new(FakeSecurity {
            fail_capture: true,
            ..FakeSecurity::default()
        });
        let file = protected_file(temp.path(), "winload.efi", service.api());

        assert!(service.take_ownership_and_grant_access(&file));
        assert_eq!(service.pending(), 0);
        assert!(service.api().get(&file).contains("O:ME"));
    }

    #[test]
    fn failed_owner_change_returns_false_but_keeps_backup() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = OwnershipElevationService::new(FakeSecurity {
            fail_owner: true,
            ..FakeSecurity::default()
        });
        let file = protected_file(temp.path(), "ci.dll", service.api());

        assert!(!service.take_ownership_and_grant_access(&file));
        assert_eq!(service.pending(), 1);
        assert!(service.api().get(&file).ends_with("(A;;FA;;;ME)"));
    }

    #[test]
    fn missing_path_returns_false() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = OwnershipElevationService::new(FakeSecurity::default());
        assert!(!service.take_ownership_and_grant_access(&temp.path().join("absent")));
        assert_eq!(service.pending(), 0);
    }

    #[test]
    fn restore_continues_past_failures_and_clears() {
        let temp = tempfile::tempdir().unwrap();
        let bad = temp.path().join("b.sys");
        let mut service = OwnershipElevationService::new(FakeSecurity {
            fail_apply_for: Some(bad.clone()),
            ..FakeSecurity::default()
        });
        let good = protected_file(temp.path(), "a.sys", service.api());
        protected_file(temp.path(), "b.sys", service.api());

        assert!(service.take_ownership_and_grant_access(&good));
        assert!(service.take_ownership_and_grant_access(&bad));

        let report = service.restore_all();
        assert_eq!(report.restored, vec![good.clone()]);
        assert_eq!(report.failed, vec![bad]);
        assert_eq!(service.api().get(&good), TRUSTED_INSTALLER);

        assert_eq!(service.restore_all(), RestoreReport::default());
        assert_eq!(service.api().applied.lock().len(), 2);
    }

    #[test]
    fn cleared_backups_are_not_restored() {
        let temp = tempfile::tempdir().unwrap();
        let api = FakeSecurity::default();
        let file = protected_file(temp.path(), "SYSTEM", &api);
        let mut service = OwnershipElevationService::new(api);

        assert!(service.take_ownership_and_grant_access(&file));
        let cleared = service.clear_backups();

        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].original.as_str(), TRUSTED_INSTALLER);
        assert_eq!(service.restore_all(), RestoreReport::default());
        assert!(service.api().applied.lock().is_empty());
    }

    #[test]
    fn dropping_service_restores_backups() {
        let temp = tempfile::tempdir().unwrap();
        let api = FakeSecurity::default();
        let file = protected_file(temp.path(), "SOFTWARE", &api);

        {
            let mut service = OwnershipElevationService::new(&api);
            assert!(service.take_ownership_and_grant_access(&file));
            assert_ne!(api.get(&file), TRUSTED_INSTALLER);
        }

        assert_eq!(api.get(&file), TRUSTED_INSTALLER);
        assert_eq!(*api.applied.lock(), vec![file]);
    }

    #[test]
    fn scope_restores_on_panic() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = OwnershipElevationService::new(FakeSecurity::default());
        let first = protected_file(temp.path(), "one.dll", service.api());
        let second = protected_file(temp.path(), "two.dll", service.api());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut scope = service.scope();
            assert!(scope.take_ownership_and_grant_access(&first));
            assert!(scope.take_ownership_and_grant_access(&second));
            panic!("collaborator failed mid-batch");
        }));

        assert!(result.is_err());
        assert_eq!(service.pending(), 0);
        assert_eq!(service.api().get(&first), TRUSTED_INSTALLER);
        assert_eq!(service.api().get(&second), TRUSTED_INSTALLER);
    }

    #[test]
    fn recursive_elevation_covers_tree() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("System32");
        std::fs::create_dir_all(root.join("drivers")).unwrap();
        let mut service = OwnershipElevationService::new(FakeSecurity::default());
        protected_file(&root, "kernel32.dll", service.api());
        protected_file(&root.join("drivers"), "ntfs.sys", service.api());

        let report = service.take_ownership_recursive(&root);

        assert_eq!(report, RecursiveReport { elevated: 4, skipped: 0 });
        assert_eq!(service.pending(), 4);
    }
}
