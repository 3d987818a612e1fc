//! Native imaging subsystem lifecycle and mount/unmount operations.

use std::path::{Path, PathBuf};

use wimkit_common::{WimError, WimResult};

use super::native::{
    CancelHandle, DismApi, LogLevel, MountAccess, NativeStatus, STATUS_ALREADY_INITIALIZED,
    UnmountMode,
};
use super::progress::{ProgressSink, ProgressTrampoline};

/// How an unmount finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// Modifications were written back to the container.
    Committed,
    /// Modifications were dropped, as requested.
    Discarded,
    /// The mount directory was busy; modifications were dropped by the
    /// forced-discard retry, whatever the caller asked for.
    DiscardedAfterBusyRetry,
}

/// Subsystem initialization options.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    /// Native log verbosity.
    pub log_level: LogLevel,
    /// Native log file.
    pub log_path: Option<PathBuf>,
    /// Native scratch directory.
    pub scratch_dir: Option<PathBuf>,
}

/// Owner of the native imaging subsystem.
///
/// The subsystem is process-global; this type is the one owned handle on
/// it. `initialize` is idempotent, `shutdown` is idempotent and
/// best-effort, and dropping the service shuts it down.
#[derive(Debug)]
pub struct NativeImageService<A: DismApi> {
    api: A,
    options: ServiceOptions,
    initialized: bool,
}

impl<A: DismApi> NativeImageService<A> {
    /// Create an uninitialized service over `api`.
    pub fn new(api: A, options: ServiceOptions) -> Self {
        Self {
            api,
            options,
            initialized: false,
        }
    }

    /// The native API this service drives.
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Whether `initialize` has succeeded and `shutdown` has not run since.
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Initialize the native subsystem. Repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::InitializationFailed`]; the session cannot
    /// continue after it.
    pub fn initialize(&mut self) -> WimResult<()> {
        if self.initialized {
            return Ok(());
        }

        if let Some(dir) = &self.options.scratch_dir {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(parent) = self.options.log_path.as_deref().and_then(Path::parent) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!(
            log_level = ?self.options.log_level,
            log_path = ?self.options.log_path,
            scratch_dir = ?self.options.scratch_dir,
            "Initializing imaging subsystem"
        );

        match self.api.initialize(
            self.options.log_level,
            self.options.log_path.as_deref(),
            self.options.scratch_dir.as_deref(),
        ) {
            Ok(()) => {}
            Err(status) if status.code == STATUS_ALREADY_INITIALIZED => {
                tracing::debug!("Imaging subsystem was already initialized");
            }
            Err(status) => {
                tracing::error!(
                    code = %format_code(status.code),
                    message = %status.message,
                    "Imaging subsystem initialization failed"
                );
                return Err(WimError::InitializationFailed {
                    code: status.code,
                    message: status.message,
                });
            }
        }

        self.initialized = true;
        tracing::info!("Imaging subsystem initialized");
        Ok(())
    }

    /// Release the native subsystem.
    ///
    /// Safe to call any number of times; failures are logged and swallowed.
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.initialized = false;

        match self.api.shutdown() {
            Ok(()) => tracing::info!("Imaging subsystem shut down"),
            Err(status) => tracing::warn!(
                code = %format_code(status.code),
                message = %status.message,
                "Imaging subsystem shutdown failed"
            ),
        }
    }

    /// Mount image `index` of `image_path` at `mount_path`.
    ///
    /// `mount_path` is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::Native`] carrying the original status when the
    /// native mount fails, or a validation error before any native call.
    pub fn mount(
        &self,
        image_path: &Path,
        mount_path: &Path,
        index: u32,
        read_only: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> WimResult<()> {
        self.ensure_initialized()?;

        if !image_path.is_file() {
            return Err(WimError::ImageNotFound {
                path: image_path.to_path_buf(),
            });
        }
        if index == 0 {
            return Err(WimError::InvalidImageIndex { index });
        }
        std::fs::create_dir_all(mount_path)?;

        tracing::info!(
            image = %image_path.display(),
            mount = %mount_path.display(),
            index,
            read_only,
            "Mounting image"
        );

        let trampoline = progress.map(|sink| ProgressTrampoline::new(sink, "Mounting image"));
        self.api
            .mount_image(
                image_path,
                mount_path,
                index,
                MountAccess::from_read_only(read_only),
                CancelHandle::none(),
                trampoline.as_ref(),
            )
            .map_err(|status| {
                tracing::error!(
                    image = %image_path.display(),
                    index,
                    code = %format_code(status.code),
                    message = %status.message,
                    "Mount failed"
                );
                status.into_error("mount image")
            })?;

        tracing::info!(mount = %mount_path.display(), "Image mounted");
        Ok(())
    }

    /// Unmount the image at `mount_path`, committing or discarding changes.
    ///
    /// If the native layer reports the mount directory as busy, one retry is
    /// made with discard semantics regardless of `commit`. When that retry
    /// fails too, the error returned is the original busy failure.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::Native`] carrying the original status.
    pub fn unmount(
        &self,
        mount_path: &Path,
        commit: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> WimResult<UnmountOutcome> {
        self.ensure_initialized()?;

        let mode = if commit {
            UnmountMode::Commit
        } else {
            UnmountMode::Discard
        };
        tracing::info!(mount = %mount_path.display(), ?mode, "Unmounting image");

        let trampoline = progress.map(|sink| ProgressTrampoline::new(sink, "Unmounting image"));
        let original = match self.unmount_once(mount_path, mode, trampoline.as_ref()) {
            Ok(()) => {
                tracing::info!(mount = %mount_path.display(), ?mode, "Image unmounted");
                return Ok(if commit {
                    UnmountOutcome::Committed
                } else {
                    UnmountOutcome::Discarded
                });
            }
            Err(status) if status.is_busy() => status,
            Err(status) => {
                tracing::error!(
                    mount = %mount_path.display(),
                    code = %format_code(status.code),
                    message = %status.message,
                    "Unmount failed"
                );
                return Err(status.into_error("unmount image"));
            }
        };

        tracing::warn!(
            mount = %mount_path.display(),
            code = %format_code(original.code),
            requested_commit = commit,
            "Mount directory busy; retrying with forced discard"
        );

        match self.unmount_once(mount_path, UnmountMode::Discard, trampoline.as_ref()) {
            Ok(()) => {
                tracing::warn!(
                    mount = %mount_path.display(),
                    "Image unmounted by forced discard; uncommitted changes were dropped"
                );
                Ok(UnmountOutcome::DiscardedAfterBusyRetry)
            }
            Err(retry) => {
                tracing::error!(
                    mount = %mount_path.display(),
                    code = %format_code(retry.code),
                    message = %retry.message,
                    original_code = %format_code(original.code),
                    "Forced discard retry failed"
                );
                Err(original.into_error("unmount image"))
            }
        }
    }

    /// Ask the native subsystem to repair orphaned mount points.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::Native`] on failure.
    pub fn cleanup_mountpoints(&self) -> WimResult<()> {
        self.ensure_initialized()?;
        tracing::info!("Cleaning up orphaned mount points");
        self.api
            .cleanup_mountpoints()
            .map_err(|status| status.into_error("cleanup mount points"))
    }

    fn unmount_once(
        &self,
        mount_path: &Path,
        mode: UnmountMode,
        trampoline: Option<&ProgressTrampoline<'_>>,
    ) -> Result<(), NativeStatus> {
        self.api
            .unmount_image(mount_path, mode, CancelHandle::none(), trampoline)
    }

    fn ensure_initialized(&self) -> WimResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(WimError::NotInitialized)
        }
    }
}

impl<A: DismApi> Drop for NativeImageService<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Render a status code the way the native tools print it.
pub(crate) fn format_code(code: u32) -> String {
    format!("0x{code:08X}")
}
