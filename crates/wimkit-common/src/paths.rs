//! Standard filesystem paths for wimkit.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for wimkit data.
pub static WIMKIT_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("WIMKIT_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_root())
});

#[cfg(windows)]
fn default_root() -> PathBuf {
    std::env::var("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(r"C:\ProgramData"))
        .join("wimkit")
}

#[cfg(not(windows))]
fn default_root() -> PathBuf {
    PathBuf::from("/var/lib/wimkit")
}

/// Standard paths used by wimkit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WimkitPaths {
    /// Root data directory.
    pub root: PathBuf,
}

impl WimkitPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create paths under the current user's local data directory.
    #[must_use]
    pub fn per_user() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        Self::with_root(base.join("wimkit"))
    }

    /// Root under which mount directories are allocated.
    #[must_use]
    pub fn mounts(&self) -> PathBuf {
        self.root.join("mounts")
    }

    /// Directory holding persisted mount records.
    #[must_use]
    pub fn state(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Scratch directory handed to the native imaging subsystem.
    #[must_use]
    pub fn scratch(&self) -> PathBuf {
        self.root.join("scratch")
    }

    /// Log directory.
    #[must_use]
    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Native imaging subsystem log file.
    #[must_use]
    pub fn native_log(&self) -> PathBuf {
        self.logs().join("dism.log")
    }

    /// Create all necessary directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.mounts())?;
        std::fs::create_dir_all(self.state())?;
        std::fs::create_dir_all(self.scratch())?;
        std::fs::create_dir_all(self.logs())?;
        Ok(())
    }
}

impl Default for WimkitPaths {
    fn default() -> Self {
        Self {
            root: WIMKIT_ROOT.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_root() {
        let paths = WimkitPaths::with_root("/tmp/wimkit-test");
        assert_eq!(paths.mounts(), PathBuf::from("/tmp/wimkit-test/mounts"));
        assert_eq!(paths.state(), PathBuf::from("/tmp/wimkit-test/state"));
        assert_eq!(
            paths.native_log(),
            PathBuf::from("/tmp/wimkit-test/logs/dism.log")
        );
    }

    #[test]
    fn create_dirs_builds_layout() {
        let temp = std::env::temp_dir().join(format!("wimkit-paths-{}", std::process::id()));
        let paths = WimkitPaths::with_root(&temp);
        paths.create_dirs().unwrap();
        assert!(paths.mounts().is_dir());
        assert!(paths.scratch().is_dir());
        std::fs::remove_dir_all(&temp).unwrap();
    }
}
