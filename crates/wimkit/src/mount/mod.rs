//! Mount directories, records and tracking.
//!
//! This module handles:
//! - Mount directory allocation and stale cleanup
//! - The [`MountedWindowsImage`] record and its status machine
//! - [`MountRegistry`]: one active mount per path
//! - Record persistence

mod allocator;
mod record;
mod registry;
mod state;

pub use allocator::{CleanupReport, DEFAULT_STALE_HOURS, MountDirectoryAllocator};
pub use record::{MountStatus, MountedWindowsImage};
pub use registry::{MountRegistry, MountRequest};
pub use state::MountStateStore;
