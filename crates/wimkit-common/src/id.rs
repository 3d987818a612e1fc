//! Mount and image identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{WimError, WimResult};

/// Identity of one successful mount.
///
/// A new `MountId` is issued for every successful mount; re-mounting the
/// same image never revives an old identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountId(Uuid);

impl MountId {
    /// Generate a new random mount ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns a short version of the ID (first 8 hex characters).
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for MountId {
    type Err = WimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_uuid(s).map(Self)
    }
}

/// Addressable identity of a source container.
///
/// Callers pass the same `ImageGuid` to correlate several mounts of one
/// container (inspection, then customization) under one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageGuid(Uuid);

impl ImageGuid {
    /// Generate a fresh GUID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Directory name used under a mount root.
    #[must_use]
    pub fn dir_name(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for ImageGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ImageGuid {
    type Err = WimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_uuid(s).map(Self)
    }
}

/// Parse a UUID, accepting the braced registry form as well.
fn parse_uuid(s: &str) -> WimResult<Uuid> {
    let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
    Uuid::parse_str(trimmed).map_err(|_| WimError::InvalidId { id: s.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_mount_ids_are_unique() {
        let id1 = MountId::generate();
        let id2 = MountId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.short().len(), 8);
    }

    #[test]
    fn image_guid_parsing() {
        let guid: ImageGuid = "{6F9619FF-8B86-D011-B42D-00C04FC964FF}".parse().unwrap();
        assert_eq!(guid.dir_name(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");

        let plain: ImageGuid = "6f9619ff-8b86-d011-b42d-00c04fc964ff".parse().unwrap();
        assert_eq!(guid, plain);
    }

    #[test]
    fn invalid_ids() {
        assert!("not-a-guid".parse::<ImageGuid>().is_err());
        assert!("".parse::<MountId>().is_err());
    }

    #[test]
    fn mount_id_round_trips_through_display() {
        let id = MountId::generate();
        let parsed: MountId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
