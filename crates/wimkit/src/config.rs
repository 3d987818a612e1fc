//! Toolkit configuration.

use std::path::PathBuf;

use wimkit_common::WimkitPaths;

use crate::imaging::{LogLevel, ServiceOptions};
use crate::mount::{DEFAULT_STALE_HOURS, MountDirectoryAllocator, MountStateStore};

/// Configuration shared by every wimkit operation.
#[derive(Debug, Clone)]
pub struct WimkitConfig {
    /// Data directory layout.
    pub paths: WimkitPaths,
    /// Age in hours after which an empty mount directory is stale.
    pub stale_mount_hours: u64,
    /// Native log verbosity.
    pub log_level: LogLevel,
    /// Scratch directory override; defaults to `paths.scratch()`.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for WimkitConfig {
    fn default() -> Self {
        Self {
            paths: WimkitPaths::new(),
            stale_mount_hours: DEFAULT_STALE_HOURS,
            log_level: LogLevel::default(),
            scratch_dir: None,
        }
    }
}

impl WimkitConfig {
    /// Configuration rooted in the current user's local data directory.
    #[must_use]
    pub fn per_user() -> Self {
        Self {
            paths: WimkitPaths::per_user(),
            ..Self::default()
        }
    }

    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = WimkitPaths::with_root(root);
        self
    }

    /// Set the stale-mount age.
    #[must_use]
    pub const fn with_stale_mount_hours(mut self, hours: u64) -> Self {
        self.stale_mount_hours = hours;
        self
    }

    /// Set the native log verbosity.
    #[must_use]
    pub const fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Override the scratch directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Effective scratch directory.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.paths.scratch())
    }

    /// Options for initializing the native imaging subsystem.
    #[must_use]
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            log_level: self.log_level,
            log_path: Some(self.paths.native_log()),
            scratch_dir: Some(self.scratch_dir()),
        }
    }

    /// Mount directory allocator rooted at `paths.mounts()`.
    #[must_use]
    pub fn allocator(&self) -> MountDirectoryAllocator {
        MountDirectoryAllocator::new(self.paths.mounts())
    }

    /// Persistent mount record store at `paths.state()`.
    #[must_use]
    pub fn state_store(&self) -> MountStateStore {
        MountStateStore::new(self.paths.state())
    }
}
