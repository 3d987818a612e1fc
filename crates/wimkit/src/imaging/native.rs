//! The foreign-function seam for the native imaging subsystem.
//!
//! [`DismApi`] covers the mount/unmount subsystem and [`WimApi`] the
//! container handle API used by export. Both speak raw statuses so the
//! services above them own every policy decision (busy recovery, handle
//! release order, failure translation).

use std::fmt;
use std::path::Path;

use wimkit_common::{Compression, WimError};

use super::progress::ProgressTrampoline;

/// "The directory could not be completely unmounted": files are still open
/// inside the mount directory.
pub const STATUS_MOUNT_BUSY: u32 = 0xC142_0117;

/// The subsystem was already initialized by this process.
pub const STATUS_ALREADY_INITIALIZED: u32 = 0xC004_0001;

/// A failed native call: the verbatim status plus the subsystem's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeStatus {
    /// Raw status code (HRESULT or Win32 error).
    pub code: u32,
    /// Message reported alongside the status.
    pub message: String,
}

impl NativeStatus {
    /// Create a status.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether this status reports a mount directory that is still in use.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.code == STATUS_MOUNT_BUSY
    }

    /// Translate into a [`WimError::Native`] for `operation`.
    #[must_use]
    pub fn into_error(self, operation: &str) -> WimError {
        WimError::native(operation, self.code, self.message)
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}: {}", self.code, self.message)
    }
}

/// Opaque native handle value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub isize);

/// Cancellation slot reserved on every long-running native call.
///
/// The services always pass [`CancelHandle::none`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelHandle(Option<RawHandle>);

impl CancelHandle {
    /// No cancellation.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// The raw event handle, if any.
    #[must_use]
    pub const fn raw(&self) -> Option<RawHandle> {
        self.0
    }
}

/// Native log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Errors only.
    Errors,
    /// Errors and warnings.
    #[default]
    ErrorsWarnings,
    /// Errors, warnings and informational messages.
    ErrorsWarningsInfo,
}

impl LogLevel {
    /// Native `DismLogLevel` value.
    #[must_use]
    pub const fn as_native(&self) -> u32 {
        match self {
            Self::Errors => 0,
            Self::ErrorsWarnings => 1,
            Self::ErrorsWarningsInfo => 2,
        }
    }
}

/// Access requested for a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAccess {
    /// Writable mount.
    ReadWrite,
    /// Read-only mount.
    ReadOnly,
}

impl MountAccess {
    /// Pick the access for a read-only flag.
    #[must_use]
    pub const fn from_read_only(read_only: bool) -> Self {
        if read_only { Self::ReadOnly } else { Self::ReadWrite }
    }

    /// Native `DISM_MOUNT_*` flag.
    #[must_use]
    pub const fn as_native(&self) -> u32 {
        match self {
            Self::ReadWrite => 0,
            Self::ReadOnly => 1,
        }
    }
}

/// What happens to modifications on unmount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountMode {
    /// Persist modifications into the container.
    Commit,
    /// Drop modifications.
    Discard,
}

impl UnmountMode {
    /// Native `DISM_*_IMAGE` flag.
    #[must_use]
    pub const fn as_native(&self) -> u32 {
        match self {
            Self::Commit => 0,
            Self::Discard => 1,
        }
    }
}

/// Mount/unmount subsystem calls.
pub trait DismApi {
    /// Initialize the process-wide subsystem.
    fn initialize(
        &self,
        log_level: LogLevel,
        log_path: Option<&Path>,
        scratch_dir: Option<&Path>,
    ) -> Result<(), NativeStatus>;

    /// Release the process-wide subsystem.
    fn shutdown(&self) -> Result<(), NativeStatus>;

    /// Mount image `index` of `image` at `mount_dir`.
    fn mount_image(
        &self,
        image: &Path,
        mount_dir: &Path,
        index: u32,
        access: MountAccess,
        cancel: CancelHandle,
        progress: Option<&ProgressTrampoline<'_>>,
    ) -> Result<(), NativeStatus>;

    /// Unmount the image at `mount_dir`.
    fn unmount_image(
        &self,
        mount_dir: &Path,
        mode: UnmountMode,
        cancel: CancelHandle,
        progress: Option<&ProgressTrampoline<'_>>,
    ) -> Result<(), NativeStatus>;

    /// Repair orphaned mount points.
    fn cleanup_mountpoints(&self) -> Result<(), NativeStatus>;
}

/// Access requested when opening a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAccess {
    /// Read only.
    Read,
    /// Write only.
    Write,
    /// Combined read/write, used for in-place export.
    ReadWrite,
}

impl ContainerAccess {
    /// Native `WIM_GENERIC_*` access mask.
    #[must_use]
    pub const fn as_native(&self) -> u32 {
        const GENERIC_READ: u32 = 0x8000_0000;
        const GENERIC_WRITE: u32 = 0x4000_0000;
        match self {
            Self::Read => GENERIC_READ,
            Self::Write => GENERIC_WRITE,
            Self::ReadWrite => GENERIC_READ | GENERIC_WRITE,
        }
    }
}

/// How a container file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The file must exist.
    OpenExisting,
    /// Open the file, creating it if missing.
    OpenAlways,
}

impl Disposition {
    /// Native `WIM_OPEN_*` value.
    #[must_use]
    pub const fn as_native(&self) -> u32 {
        match self {
            Self::OpenExisting => 3,
            Self::OpenAlways => 4,
        }
    }
}

/// Options for opening a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Access mask.
    pub access: ContainerAccess,
    /// Open disposition.
    pub disposition: Disposition,
    /// Compression applied if the container is created.
    pub compression: Compression,
    /// Verify integrity tables.
    pub check_integrity: bool,
}

impl OpenOptions {
    /// Native `WIM_FLAG_*` bits.
    #[must_use]
    pub const fn native_flags(&self) -> u32 {
        const WIM_FLAG_VERIFY: u32 = 0x0000_0002;
        if self.check_integrity { WIM_FLAG_VERIFY } else { 0 }
    }
}

/// Container handle calls used by export.
pub trait WimApi {
    /// Open or create a container.
    fn open_container(&self, path: &Path, options: OpenOptions) -> Result<RawHandle, NativeStatus>;

    /// Set the temporary directory used while reading `container`.
    fn set_temporary_path(&self, container: RawHandle, path: &Path) -> Result<(), NativeStatus>;

    /// Load image `index` from `container`.
    fn load_image(&self, container: RawHandle, index: u32) -> Result<RawHandle, NativeStatus>;

    /// Route progress messages for `container` to `trampoline`.
    ///
    /// The trampoline must stay alive until [`WimApi::unregister_progress`].
    fn register_progress(
        &self,
        container: RawHandle,
        trampoline: &ProgressTrampoline<'_>,
    ) -> Result<(), NativeStatus>;

    /// Stop routing progress messages for `container`.
    fn unregister_progress(&self, container: RawHandle) -> Result<(), NativeStatus>;

    /// Export `image` into `destination`.
    fn export_image(&self, image: RawHandle, destination: RawHandle) -> Result<(), NativeStatus>;

    /// Close a container or image handle.
    fn close_handle(&self, handle: RawHandle) -> Result<(), NativeStatus>;
}
