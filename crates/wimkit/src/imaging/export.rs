//! Container-to-container image export.

use std::path::{Path, PathBuf};

use wimkit_common::{Compression, WimError, WimResult};

use super::native::{ContainerAccess, Disposition, NativeStatus, OpenOptions, RawHandle, WimApi};
use super::progress::{ProgressSink, ProgressTrampoline};
use super::service::format_code;

/// One export request.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Source container.
    pub source: PathBuf,
    /// Destination container, created if missing.
    pub destination: PathBuf,
    /// 1-based image index in the source.
    pub source_index: u32,
    /// Compression used if the destination is created.
    pub compression: Compression,
    /// Verify integrity tables while reading and writing.
    pub check_integrity: bool,
    /// Temporary directory for the native layer.
    pub scratch_dir: Option<PathBuf>,
}

impl ExportRequest {
    /// Build a request, resolving `compression` by name.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::UnknownCompression`] for an unrecognized name.
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        source_index: u32,
        compression: &str,
    ) -> WimResult<Self> {
        Ok(Self {
            source: source.into(),
            destination: destination.into(),
            source_index,
            compression: Compression::parse(compression)?,
            check_integrity: false,
            scratch_dir: None,
        })
    }

    /// Enable integrity checking.
    #[must_use]
    pub const fn with_integrity_check(mut self, check: bool) -> Self {
        self.check_integrity = check;
        self
    }

    /// Set the scratch directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Whether source and destination name the same container.
    #[must_use]
    pub fn is_in_place(&self) -> bool {
        same_container(&self.source, &self.destination)
    }
}

/// Exports images between containers through [`WimApi`].
#[derive(Debug)]
pub struct WimExportEngine<W: WimApi> {
    api: W,
}

impl<W: WimApi> WimExportEngine<W> {
    /// Create an engine over `api`.
    pub const fn new(api: W) -> Self {
        Self { api }
    }

    /// The native API this engine drives.
    pub const fn api(&self) -> &W {
        &self.api
    }

    /// Export one image.
    ///
    /// Every acquired handle is released before this returns, on success
    /// and failure alike. A partially written destination is left on disk.
    ///
    /// # Errors
    ///
    /// Returns [`WimError::Native`] with the status of the failing call.
    pub fn export(
        &self,
        request: &ExportRequest,
        progress: Option<&dyn ProgressSink>,
    ) -> WimResult<()> {
        if !request.source.is_file() {
            return Err(WimError::ImageNotFound {
                path: request.source.clone(),
            });
        }
        if request.source_index == 0 {
            return Err(WimError::InvalidImageIndex {
                index: request.source_index,
            });
        }

        let in_place = request.is_in_place();
        tracing::info!(
            source = %request.source.display(),
            destination = %request.destination.display(),
            index = request.source_index,
            compression = %request.compression,
            in_place,
            "Exporting image"
        );

        let trampoline = progress.map(|sink| ProgressTrampoline::new(sink, "Exporting image"));
        self.run(request, in_place, trampoline.as_ref())
            .inspect_err(|err| tracing::error!(error = %err, "Export failed"))?;

        tracing::info!(destination = %request.destination.display(), "Image exported");
        Ok(())
    }

    fn run(
        &self,
        request: &ExportRequest,
        in_place: bool,
        trampoline: Option<&ProgressTrampoline<'_>>,
    ) -> WimResult<()> {
        let mut session = ExportSession {
            callback: None,
            image: None,
            destination: None,
            source: None,
        };

        let source_access = if in_place {
            ContainerAccess::ReadWrite
        } else {
            ContainerAccess::Read
        };
        let source = session
            .source
            .insert(self.open(
                &request.source,
                OpenOptions {
                    access: source_access,
                    disposition: Disposition::OpenExisting,
                    compression: Compression::None,
                    check_integrity: request.check_integrity,
                },
                "source container",
            )?)
            .raw;

        if let Some(scratch) = &request.scratch_dir {
            std::fs::create_dir_all(scratch)?;
            self.api
                .set_temporary_path(source, scratch)
                .map_err(|s| s.into_error("set temporary path"))?;
        }

        let image = session
            .image
            .insert(self.acquire(
                self.api.load_image(source, request.source_index),
                "source image",
                "load image",
            )?)
            .raw;

        let destination = if in_place {
            source
        } else {
            session
                .destination
                .insert(self.open(
                    &request.destination,
                    OpenOptions {
                        access: ContainerAccess::Write,
                        disposition: Disposition::OpenAlways,
                        compression: request.compression,
                        check_integrity: request.check_integrity,
                    },
                    "destination container",
                )?)
                .raw
        };

        if let Some(trampoline) = trampoline {
            self.api
                .register_progress(destination, trampoline)
                .map_err(|s| s.into_error("register progress callback"))?;
            session.callback = Some(CallbackRegistration {
                api: &self.api,
                container: destination,
            });
        }

        self.api
            .export_image(image, destination)
            .map_err(|s| s.into_error("export image"))
    }

    fn open(
        &self,
        path: &Path,
        options: OpenOptions,
        kind: &'static str,
    ) -> WimResult<NativeHandle<'_, W>> {
        tracing::debug!(path = %path.display(), ?options, kind, "Opening container");
        self.acquire(self.api.open_container(path, options), kind, "open container")
    }

    fn acquire(
        &self,
        result: Result<RawHandle, NativeStatus>,
        kind: &'static str,
        operation: &str,
    ) -> WimResult<NativeHandle<'_, W>> {
        let raw = result.map_err(|s| s.into_error(operation))?;
        Ok(NativeHandle {
            api: &self.api,
            raw,
            kind,
        })
    }
}

/// Handles held during one export.
///
/// Fields drop in declaration order, which is the release order on every
/// exit path: callback, image, destination (only when distinct from the
/// source), source.
struct ExportSession<'a, W: WimApi> {
    callback: Option<CallbackRegistration<'a, W>>,
    image: Option<NativeHandle<'a, W>>,
    destination: Option<NativeHandle<'a, W>>,
    source: Option<NativeHandle<'a, W>>,
}

/// A container or image handle, closed exactly once on drop.
struct NativeHandle<'a, W: WimApi> {
    api: &'a W,
    raw: RawHandle,
    kind: &'static str,
}

impl<W: WimApi> Drop for NativeHandle<'_, W> {
    fn drop(&mut self) {
        if let Err(status) = self.api.close_handle(self.raw) {
            tracing::warn!(
                kind = self.kind,
                code = %format_code(status.code),
                message = %status.message,
                "Failed to close native handle"
            );
        }
    }
}

/// A registered progress callback, unregistered on drop.
struct CallbackRegistration<'a, W: WimApi> {
    api: &'a W,
    container: RawHandle,
}

impl<W: WimApi> Drop for CallbackRegistration<'_, W> {
    fn drop(&mut self) {
        if let Err(status) = self.api.unregister_progress(self.container) {
            tracing::warn!(
                code = %format_code(status.code),
                "Failed to unregister progress callback"
            );
        }
    }
}

/// Whether two paths name the same container file.
fn same_container(a: &Path, b: &Path) -> bool {
    if let (Ok(a), Ok(b)) = (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        return a == b;
    }
    if cfg!(windows) {
        a.as_os_str().eq_ignore_ascii_case(b.as_os_str())
    } else {
        a == b
    }
}
