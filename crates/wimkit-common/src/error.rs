//! Common error types for wimkit.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`WimError`].
pub type WimResult<T> = Result<T, WimError>;

/// Common errors across wimkit.
#[derive(Error, Diagnostic, Debug)]
pub enum WimError {
    /// A native imaging or security call failed.
    #[error("{operation} failed with 0x{code:08X}: {message}")]
    #[diagnostic(code(wimkit::native))]
    Native {
        /// The operation that was attempted.
        operation: String,
        /// The status code reported by the native layer, verbatim.
        code: u32,
        /// The message reported by the native layer.
        message: String,
    },

    /// The native imaging subsystem could not be initialized.
    #[error("Imaging subsystem initialization failed with 0x{code:08X}: {message}")]
    #[diagnostic(
        code(wimkit::init),
        help("The imaging subsystem requires an elevated (administrator) process")
    )]
    InitializationFailed {
        /// The status code reported by the native layer.
        code: u32,
        /// The message reported by the native layer.
        message: String,
    },

    /// An operation was issued before the imaging subsystem was initialized.
    #[error("Imaging subsystem is not initialized")]
    #[diagnostic(code(wimkit::not_initialized))]
    NotInitialized,

    /// Image container file not found.
    #[error("Image not found: {}", path.display())]
    #[diagnostic(code(wimkit::image::not_found))]
    ImageNotFound {
        /// The container path that was not found.
        path: PathBuf,
    },

    /// Invalid image index.
    #[error("Invalid image index: {index}")]
    #[diagnostic(
        code(wimkit::image::invalid_index),
        help("Image indexes are 1-based")
    )]
    InvalidImageIndex {
        /// The invalid index.
        index: u32,
    },

    /// A mount path is already referenced by an active mount.
    #[error("Mount path already in use: {}", path.display())]
    #[diagnostic(
        code(wimkit::mount::path_in_use),
        help("Unmount the existing image or allocate a new mount directory")
    )]
    MountPathInUse {
        /// The mount path.
        path: PathBuf,
    },

    /// No active mount is tracked at a path.
    #[error("No image mounted at {}", path.display())]
    #[diagnostic(code(wimkit::mount::not_mounted))]
    NotMounted {
        /// The mount path.
        path: PathBuf,
    },

    /// A mount record status change that would move backwards.
    #[error("Invalid mount status transition: {from} -> {to}")]
    #[diagnostic(code(wimkit::mount::invalid_transition))]
    InvalidTransition {
        /// The current status.
        from: String,
        /// The requested status.
        to: String,
    },

    /// Unrecognized compression name.
    #[error("Unknown compression type: {name}")]
    #[diagnostic(
        code(wimkit::export::unknown_compression),
        help("Use one of: none, fast, maximum, recovery")
    )]
    UnknownCompression {
        /// The unrecognized name.
        name: String,
    },

    /// Invalid mount or image identifier.
    #[error("Invalid identifier: {id}")]
    #[diagnostic(code(wimkit::invalid_id))]
    InvalidId {
        /// The invalid identifier.
        id: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(wimkit::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(wimkit::serialization))]
    Serialization(String),

    /// Permission denied.
    #[error("Permission denied: {operation}")]
    #[diagnostic(
        code(wimkit::permission_denied),
        help("Try running from an elevated (administrator) prompt")
    )]
    PermissionDenied {
        /// The operation that was denied.
        operation: String,
    },

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(
        code(wimkit::unsupported),
        help("Image mounting and export require Windows with the DISM API available")
    )]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(wimkit::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(wimkit::internal),
        help("This is a bug, please report it at https://github.com/wimkit/wimkit/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl WimError {
    /// Build a [`WimError::Native`] for a failed operation.
    pub fn native(operation: impl Into<String>, code: u32, message: impl Into<String>) -> Self {
        Self::Native {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// The native status code carried by this error, if any.
    #[must_use]
    pub const fn native_code(&self) -> Option<u32> {
        match self {
            Self::Native { code, .. } | Self::InitializationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for WimError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
