//! # Wimkit
//!
//! Mount, unmount and export Windows image (WIM) containers, and take
//! temporary ownership of protected files inside mounted images.
//!
//! ## Features
//!
//! - **Mount directories**: deterministic `<root>/<guid>/<index>` allocation
//!   and stale-directory cleanup
//! - **Native imaging**: subsystem lifecycle, mount, and unmount with
//!   busy-directory recovery
//! - **Mount tracking**: one active mount per path, persisted across runs
//! - **Ownership elevation**: backup-then-elevate with guaranteed restore
//! - **Export**: copy an image between containers with compression
//!
//! ## Usage
//!
//! ```no_run
//! use wimkit::config::WimkitConfig;
//! use wimkit::imaging::{NativeImageService, SystemDism};
//! use wimkit::mount::{MountRegistry, MountRequest};
//!
//! # fn example() -> wimkit_common::WimResult<()> {
//! let config = WimkitConfig::default();
//! let mut service = NativeImageService::new(SystemDism::new()?, config.service_options());
//! service.initialize()?;
//!
//! let mount_path = config.allocator().allocate(1, None)?;
//! let mut registry = MountRegistry::with_store(config.state_store())?;
//! let mut record = registry.mount(
//!     &service,
//!     &MountRequest {
//!         image_path: r"D:\sources\install.wim".into(),
//!         index: 1,
//!         mount_path,
//!         read_only: true,
//!     },
//!     None,
//! )?;
//!
//! registry.unmount(&service, &mut record, false, None)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod imaging;
pub mod mount;
pub mod security;
#[cfg(windows)]
mod win;

pub use config::WimkitConfig;
pub use imaging::{NativeImageService, UnmountOutcome, WimExportEngine};
pub use mount::{MountDirectoryAllocator, MountRegistry, MountedWindowsImage};
pub use security::OwnershipElevationService;
