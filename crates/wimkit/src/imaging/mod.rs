//! Native imaging: subsystem lifecycle, mount/unmount and export.
//!
//! This module handles:
//! - The [`DismApi`]/[`WimApi`] foreign-function seam
//! - Progress trampolines for native callbacks
//! - [`NativeImageService`]: init/shutdown, mount, unmount with busy recovery
//! - [`WimExportEngine`]: container-to-container export

mod dism;
mod export;
pub mod native;
pub mod progress;
mod service;
mod wimgapi;

pub use dism::SystemDism;
pub use export::{ExportRequest, WimExportEngine};
pub use native::{CancelHandle, DismApi, LogLevel, NativeStatus, RawHandle, WimApi};
pub use progress::{INDETERMINATE, ProgressSink, ProgressTrampoline};
pub use service::{NativeImageService, ServiceOptions, UnmountOutcome};
pub use wimgapi::SystemWim;
