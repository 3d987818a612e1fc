//! Mount record persistence.

use std::path::{Path, PathBuf};

use wimkit_common::{MountId, WimResult};

use super::record::MountedWindowsImage;

/// Persists tracked mount records as `<state_dir>/<mount-id>.json`.
#[derive(Debug, Clone)]
pub struct MountStateStore {
    /// Base path for state files.
    state_dir: PathBuf,
}

impl MountStateStore {
    /// Create a new state store.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Directory holding the state files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.state_dir
    }

    /// Get the path to a mount's state file.
    #[must_use]
    pub fn state_path(&self, mount_id: MountId) -> PathBuf {
        self.state_dir.join(format!("{mount_id}.json"))
    }

    /// Save a mount record.
    pub fn save(&self, record: &MountedWindowsImage) -> WimResult<()> {
        std::fs::create_dir_all(&self.state_dir)?;

        let path = self.state_path(record.mount_id());
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)?;

        tracing::debug!(
            mount_id = %record.mount_id(),
            path = %path.display(),
            "Saved mount state"
        );

        Ok(())
    }

    /// Delete a mount record.
    pub fn delete(&self, mount_id: MountId) -> WimResult<()> {
        let path = self.state_path(mount_id);

        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::debug!(
                mount_id = %mount_id,
                path = %path.display(),
                "Deleted mount state"
            );
        }

        Ok(())
    }

    /// Load every persisted record.
    ///
    /// Unreadable files are skipped with a warning.
    pub fn load_all(&self) -> WimResult<Vec<MountedWindowsImage>> {
        let mut records = Vec::new();

        if !self.state_dir.exists() {
            return Ok(records);
        }

        for entry in std::fs::read_dir(&self.state_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let parsed = std::fs::read_to_string(&path)
                .map_err(wimkit_common::WimError::from)
                .and_then(|json| Ok(serde_json::from_str::<MountedWindowsImage>(&json)?));
            match parsed {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Skipping unreadable mount state");
                }
            }
        }

        Ok(records)
    }
}
