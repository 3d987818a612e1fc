//! # wimkit-common
//!
//! Shared types for the wimkit image servicing toolkit.
//!
//! This crate provides common functionality used by every wimkit layer:
//! - Mount and image identifiers
//! - Standard filesystem paths
//! - Container compression names
//! - Common error types

#![warn(missing_docs)]

pub mod compression;
pub mod error;
pub mod id;
pub mod paths;

pub use compression::Compression;
pub use error::{WimError, WimResult};
pub use id::{ImageGuid, MountId};
pub use paths::WimkitPaths;
