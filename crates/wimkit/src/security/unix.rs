//! Unix ownership backend: owner uid/gid plus permission bits.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use rustix::fs::{AtFlags, CWD, Gid, Uid, chownat};
use rustix::process::geteuid;
use wimkit_common::{WimError, WimResult};

use super::{SecurityApi, SecurityDescriptor};

/// Owner and access bits for the effective user.
const OWNER_FULL_DIR: u32 = 0o700;
const OWNER_FULL_FILE: u32 = 0o600;

/// Ownership backend of the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSecurity {
    _private: (),
}

impl SystemSecurity {
    /// Bind to the platform security calls.
    ///
    /// # Errors
    ///
    /// Never fails on Unix.
    pub fn new() -> WimResult<Self> {
        Ok(Self { _private: () })
    }
}

fn map_err(operation: &str, path: &Path, err: io::Error) -> WimError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        WimError::PermissionDenied {
            operation: format!("{operation} {}", path.display()),
        }
    } else {
        WimError::Io(err)
    }
}

/// Change the owner of `path` itself; a symlink is not followed.
fn lchown(path: &Path, owner: Option<Uid>, group: Option<Gid>) -> WimResult<()> {
    chownat(CWD, path, owner, group, AtFlags::SYMLINK_NOFOLLOW)
        .map_err(|e| map_err("chown", path, io::Error::from(e)))
}

/// Parse `uid:gid:mode` as written by [`SystemSecurity::capture`].
fn parse_descriptor(descriptor: &SecurityDescriptor) -> WimResult<(u32, u32, u32)> {
    let invalid = || WimError::Internal {
        message: format!("malformed security descriptor '{descriptor}'"),
    };
    let mut parts = descriptor.as_str().split(':');
    let uid = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let gid = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let mode = parts
        .next()
        .and_then(|p| u32::from_str_radix(p, 8).ok())
        .ok_or_else(invalid)?;
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok((uid, gid, mode))
}

impl SecurityApi for SystemSecurity {
    fn capture(&self, path: &Path) -> WimResult<SecurityDescriptor> {
        let metadata = fs::symlink_metadata(path).map_err(|e| map_err("stat", path, e))?;
        Ok(SecurityDescriptor::new(format!(
            "{}:{}:{:o}",
            metadata.uid(),
            metadata.gid(),
            metadata.mode() & 0o7777
        )))
    }

    fn take_ownership(&self, path: &Path) -> WimResult<()> {
        let owner = geteuid();
        let current = fs::symlink_metadata(path).map_err(|e| map_err("stat", path, e))?;
        if current.uid() == owner.as_raw() {
            return Ok(());
        }
        lchown(path, Some(owner), None)
    }

    fn grant_full_control(&self, path: &Path, is_directory: bool) -> WimResult<()> {
        let metadata = fs::symlink_metadata(path).map_err(|e| map_err("stat", path, e))?;
        // Link permissions are never consulted; chmod would hit the target.
        if metadata.file_type().is_symlink() {
            return Ok(());
        }
        let bits = if is_directory {
            OWNER_FULL_DIR
        } else {
            OWNER_FULL_FILE
        };
        let mode = metadata.mode() & 0o7777;
        if mode & bits == bits {
            return Ok(());
        }
        fs::set_permissions(path, Permissions::from_mode(mode | bits))
            .map_err(|e| map_err("chmod", path, e))
    }

    fn apply(&self, path: &Path, descriptor: &SecurityDescriptor) -> WimResult<()> {
        let (uid, gid, mode) = parse_descriptor(descriptor)?;
        let current = fs::symlink_metadata(path).map_err(|e| map_err("stat", path, e))?;
        if current.uid() != uid || current.gid() != gid {
            lchown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
        }
        if current.file_type().is_symlink() {
            return Ok(());
        }
        fs::set_permissions(path, Permissions::from_mode(mode))
            .map_err(|e| map_err("chmod", path, e))
    }
}
