//! The record describing one active mount.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wimkit_common::{MountId, WimError, WimResult};

use crate::imaging::UnmountOutcome;

/// Lifecycle status of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountStatus {
    /// Native mount issued.
    MountRequested,
    /// Image mounted.
    Mounted,
    /// Native mount failed.
    MountFailed,
    /// Native unmount issued.
    UnmountRequested,
    /// Unmounted with modifications written back.
    Committed,
    /// Unmounted with modifications dropped.
    Discarded,
    /// Unmounted by the forced-discard retry after a busy failure.
    DiscardedAfterBusyRetry,
    /// Native unmount failed; the image may still be mounted.
    UnmountFailed,
}

impl MountStatus {
    /// Whether `self -> next` moves the lifecycle forward.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::MountRequested, Self::Mounted | Self::MountFailed)
                | (Self::Mounted | Self::UnmountFailed, Self::UnmountRequested)
                | (
                    Self::UnmountRequested,
                    Self::Committed
                        | Self::Discarded
                        | Self::DiscardedAfterBusyRetry
                        | Self::UnmountFailed
                )
        )
    }

    /// Whether the image is no longer mounted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::MountFailed | Self::Committed | Self::Discarded | Self::DiscardedAfterBusyRetry
        )
    }

    /// Status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MountRequested => "mount_requested",
            Self::Mounted => "mounted",
            Self::MountFailed => "mount_failed",
            Self::UnmountRequested => "unmount_requested",
            Self::Committed => "committed",
            Self::Discarded => "discarded",
            Self::DiscardedAfterBusyRetry => "discarded_after_busy_retry",
            Self::UnmountFailed => "unmount_failed",
        }
    }
}

impl fmt::Display for MountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<UnmountOutcome> for MountStatus {
    fn from(outcome: UnmountOutcome) -> Self {
        match outcome {
            UnmountOutcome::Committed => Self::Committed,
            UnmountOutcome::Discarded => Self::Discarded,
            UnmountOutcome::DiscardedAfterBusyRetry => Self::DiscardedAfterBusyRetry,
        }
    }
}

/// One mounted image.
///
/// Owned by the caller once returned. Only the registry driving the native
/// calls changes its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedWindowsImage {
    mount_id: MountId,
    source_image_path: PathBuf,
    image_index: u32,
    mount_path: PathBuf,
    read_only: bool,
    status: MountStatus,
    mounted_at: DateTime<Utc>,
}

impl MountedWindowsImage {
    pub(crate) fn mounted(
        source_image_path: PathBuf,
        image_index: u32,
        mount_path: PathBuf,
        read_only: bool,
    ) -> Self {
        Self {
            mount_id: MountId::generate(),
            source_image_path,
            image_index,
            mount_path,
            read_only,
            status: MountStatus::Mounted,
            mounted_at: Utc::now(),
        }
    }

    /// Identity of this mount.
    #[must_use]
    pub const fn mount_id(&self) -> MountId {
        self.mount_id
    }

    /// Container the image was mounted from.
    #[must_use]
    pub fn source_image_path(&self) -> &Path {
        &self.source_image_path
    }

    /// 1-based image index.
    #[must_use]
    pub const fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Directory the image is mounted at.
    #[must_use]
    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    /// Whether the mount is read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> MountStatus {
        self.status
    }

    /// When the mount succeeded.
    #[must_use]
    pub const fn mounted_at(&self) -> DateTime<Utc> {
        self.mounted_at
    }

    pub(crate) fn advance(&mut self, next: MountStatus) -> WimResult<()> {
        if !self.status.can_advance_to(next) {
            return Err(WimError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(
            mount_id = %self.mount_id,
            from = %self.status,
            to = %next,
            "Mount status changed"
        );
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MountedWindowsImage {
        MountedWindowsImage::mounted("install.wim".into(), 1, "/mnt/1".into(), true)
    }

    #[test]
    fn forward_transitions() {
        let mut rec = record();
        assert_eq!(rec.status(), MountStatus::Mounted);
        rec.advance(MountStatus::UnmountRequested).unwrap();
        rec.advance(MountStatus::DiscardedAfterBusyRetry).unwrap();
        assert!(rec.status().is_terminal());
    }

    #[test]
    fn status_never_moves_backwards() {
        let mut rec = record();
        rec.advance(MountStatus::UnmountRequested).unwrap();
        rec.advance(MountStatus::Committed).unwrap();

        let err = rec.advance(MountStatus::Mounted).unwrap_err();
        assert!(matches!(err, WimError::InvalidTransition { .. }));
        assert!(rec.advance(MountStatus::UnmountRequested).is_err());
        assert_eq!(rec.status(), MountStatus::Committed);
    }

    #[test]
    fn failed_unmount_may_be_retried() {
        let mut rec = record();
        rec.advance(MountStatus::UnmountRequested).unwrap();
        rec.advance(MountStatus::UnmountFailed).unwrap();
        assert!(!rec.status().is_terminal());
        rec.advance(MountStatus::UnmountRequested).unwrap();
        assert!(!MountStatus::UnmountFailed.can_advance_to(MountStatus::Mounted));
    }

    #[test]
    fn outcome_maps_to_distinct_status() {
        assert_eq!(
            MountStatus::from(UnmountOutcome::DiscardedAfterBusyRetry),
            MountStatus::DiscardedAfterBusyRetry
        );
        assert_ne!(
            MountStatus::from(UnmountOutcome::DiscardedAfterBusyRetry),
            MountStatus::from(UnmountOutcome::Discarded)
        );
    }

    #[test]
    fn record_serializes_status_in_snake_case() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["status"], "mounted");
        assert_eq!(json["image_index"], 1);
    }
}
