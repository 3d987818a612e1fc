//! File ownership elevation.
//!
//! This module provides:
//! - [`SecurityApi`]: capture, mutate and re-apply owner/ACL descriptors
//! - [`SystemSecurity`]: the platform backend (Win32 security descriptors on
//!   Windows, owner uid/gid plus mode bits on Unix)
//! - [`OwnershipElevationService`]: backup-then-elevate with guaranteed
//!   restoration

mod elevation;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wimkit_common::WimResult;

pub use elevation::{ElevationScope, OwnershipElevationService, RecursiveReport, RestoreReport};
#[cfg(unix)]
pub use self::unix::SystemSecurity;
#[cfg(windows)]
pub use self::windows::SystemSecurity;

/// Opaque snapshot of a path's owner and access-control list.
///
/// On Windows this is the SDDL form of the owner and DACL; on Unix it is
/// `uid:gid:mode`. Two snapshots of an unchanged path compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityDescriptor(String);

impl SecurityDescriptor {
    /// Wrap a platform descriptor string.
    pub fn new(repr: impl Into<String>) -> Self {
        Self(repr.into())
    }

    /// The platform descriptor string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecurityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner/ACL state of a path captured before elevation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityBackup {
    /// The elevated path.
    pub path: PathBuf,
    /// Whether the path is a directory.
    pub is_directory: bool,
    /// Descriptor captured before any mutation.
    pub original: SecurityDescriptor,
}

/// Platform security calls.
pub trait SecurityApi {
    /// Snapshot the owner and access-control list of `path`.
    fn capture(&self, path: &Path) -> WimResult<SecurityDescriptor>;

    /// Make the current process identity the owner of `path`.
    fn take_ownership(&self, path: &Path) -> WimResult<()>;

    /// Grant the current process identity full control of `path`.
    fn grant_full_control(&self, path: &Path, is_directory: bool) -> WimResult<()>;

    /// Re-apply a captured snapshot.
    fn apply(&self, path: &Path, descriptor: &SecurityDescriptor) -> WimResult<()>;
}

impl<T: SecurityApi + ?Sized> SecurityApi for &T {
    fn capture(&self, path: &Path) -> WimResult<SecurityDescriptor> {
        (**self).capture(path)
    }

    fn take_ownership(&self, path: &Path) -> WimResult<()> {
        (**self).take_ownership(path)
    }

    fn grant_full_control(&self, path: &Path, is_directory: bool) -> WimResult<()> {
        (**self).grant_full_control(path, is_directory)
    }

    fn apply(&self, path: &Path, descriptor: &SecurityDescriptor) -> WimResult<()> {
        (**self).apply(path, descriptor)
    }
}
