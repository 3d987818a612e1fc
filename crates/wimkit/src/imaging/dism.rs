//! DISM API binding for the mount/unmount subsystem.
#![allow(unsafe_code)]

use wimkit_common::WimResult;

#[cfg(windows)]
pub use self::windows::SystemDism;

#[cfg(not(windows))]
pub use self::unsupported::SystemDism;

#[cfg(windows)]
mod windows {
    use std::ffi::c_void;
    use std::panic::{self, AssertUnwindSafe};
    use std::path::Path;
    use std::ptr;

    use super::WimResult;
    use crate::imaging::native::{
        CancelHandle, DismApi, LogLevel, MountAccess, NativeStatus, UnmountMode,
    };
    use crate::imaging::progress::ProgressTrampoline;
    use crate::win::{wide, wide_opt};

    type ProgressCallback = extern "system" fn(current: u32, total: u32, user_data: *mut c_void);

    /// `DismImageIndex`: select the image by index.
    const DISM_IMAGE_INDEX: u32 = 0;

    #[repr(C)]
    struct DismString {
        value: *const u16,
    }

    #[link(name = "dismapi")]
    unsafe extern "system" {
        fn DismInitialize(log_level: u32, log_file_path: *const u16, scratch_dir: *const u16) -> i32;
        fn DismShutdown() -> i32;
        fn DismMountImage(
            image_file_path: *const u16,
            mount_path: *const u16,
            image_index: u32,
            image_name: *const u16,
            image_identifier: u32,
            flags: u32,
            cancel_event: *mut c_void,
            progress: Option<ProgressCallback>,
            user_data: *mut c_void,
        ) -> i32;
        fn DismUnmountImage(
            mount_path: *const u16,
            flags: u32,
            cancel_event: *mut c_void,
            progress: Option<ProgressCallback>,
            user_data: *mut c_void,
        ) -> i32;
        fn DismCleanupMountpoints() -> i32;
        fn DismGetLastErrorMessage(message: *mut *mut DismString) -> i32;
        fn DismDelete(structure: *mut c_void) -> i32;
    }

    /// Progress trampoline registered with the DISM API.
    ///
    /// Runs on a DISM-owned thread: nothing may unwind out of it.
    extern "system" fn progress_trampoline(current: u32, total: u32, user_data: *mut c_void) {
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            if user_data.is_null() {
                return;
            }
            // SAFETY: user_data is the `&ProgressTrampoline` passed by the
            // caller, alive for the duration of the native call.
            let trampoline = unsafe { &*user_data.cast::<ProgressTrampoline<'_>>() };
            trampoline.tick(u64::from(current), u64::from(total));
        }));
    }

    fn callback_args(
        progress: Option<&ProgressTrampoline<'_>>,
    ) -> (Option<ProgressCallback>, *mut c_void) {
        match progress {
            Some(t) => (
                Some(progress_trampoline as ProgressCallback),
                ptr::from_ref(t).cast_mut().cast(),
            ),
            None => (None, ptr::null_mut()),
        }
    }

    fn cancel_event(cancel: CancelHandle) -> *mut c_void {
        cancel.raw().map_or(ptr::null_mut(), |h| h.0 as *mut c_void)
    }

    /// The DISM API of the running system.
    #[derive(Debug, Default)]
    pub struct SystemDism {
        _private: (),
    }

    impl SystemDism {
        /// Bind to the system DISM API.
        ///
        /// # Errors
        ///
        /// Never fails on Windows.
        pub fn new() -> WimResult<Self> {
            Ok(Self { _private: () })
        }

        fn check(hr: i32) -> Result<(), NativeStatus> {
            if hr >= 0 {
                return Ok(());
            }
            Err(NativeStatus::new(u32::from_ne_bytes(hr.to_ne_bytes()), last_error_message()))
        }
    }

    fn last_error_message() -> String {
        let mut message: *mut DismString = ptr::null_mut();
        // SAFETY: DismGetLastErrorMessage writes a DISM-owned string that we
        // release with DismDelete.
        unsafe {
            if DismGetLastErrorMessage(&mut message) < 0 || message.is_null() {
                return String::new();
            }
            let text = crate::win::from_wide_ptr((*message).value);
            DismDelete(message.cast());
            text.trim().to_string()
        }
    }

    impl DismApi for SystemDism {
        fn initialize(
            &self,
            log_level: LogLevel,
            log_path: Option<&Path>,
            scratch_dir: Option<&Path>,
        ) -> Result<(), NativeStatus> {
            let log_path = wide_opt(log_path);
            let scratch_dir = wide_opt(scratch_dir);
            // SAFETY: both strings are NUL-terminated and outlive the call.
            Self::check(unsafe {
                DismInitialize(
                    log_level.as_native(),
                    log_path.as_ref().map_or(ptr::null(), |w| w.as_ptr()),
                    scratch_dir.as_ref().map_or(ptr::null(), |w| w.as_ptr()),
                )
            })
        }

        fn shutdown(&self) -> Result<(), NativeStatus> {
            // SAFETY: no arguments; DISM tolerates shutdown after init.
            Self::check(unsafe { DismShutdown() })
        }

        fn mount_image(
            &self,
            image: &Path,
            mount_dir: &Path,
            index: u32,
            access: MountAccess,
            cancel: CancelHandle,
            progress: Option<&ProgressTrampoline<'_>>,
        ) -> Result<(), NativeStatus> {
            let image = wide(image);
            let mount_dir = wide(mount_dir);
            let (callback, user_data) = callback_args(progress);
            // SAFETY: strings are NUL-terminated; user_data points at a
            // trampoline borrowed for the whole blocking call.
            Self::check(unsafe {
                DismMountImage(
                    image.as_ptr(),
                    mount_dir.as_ptr(),
                    index,
                    ptr::null(),
                    DISM_IMAGE_INDEX,
                    access.as_native(),
                    cancel_event(cancel),
                    callback,
                    user_data,
                )
            })
        }

        fn unmount_image(
            &self,
            mount_dir: &Path,
            mode: UnmountMode,
            cancel: CancelHandle,
            progress: Option<&ProgressTrampoline<'_>>,
        ) -> Result<(), NativeStatus> {
            let mount_dir = wide(mount_dir);
            let (callback, user_data) = callback_args(progress);
            // SAFETY: as for DismMountImage.
            Self::check(unsafe {
                DismUnmountImage(
                    mount_dir.as_ptr(),
                    mode.as_native(),
                    cancel_event(cancel),
                    callback,
                    user_data,
                )
            })
        }

        fn cleanup_mountpoints(&self) -> Result<(), NativeStatus> {
            // SAFETY: no arguments.
            Self::check(unsafe { DismCleanupMountpoints() })
        }
    }
}

#[cfg(not(windows))]
mod unsupported {
    use std::path::Path;

    use wimkit_common::WimError;

    use super::WimResult;
    use crate::imaging::native::{
        CancelHandle, DismApi, LogLevel, MountAccess, NativeStatus, UnmountMode,
    };
    use crate::imaging::progress::ProgressTrampoline;

    /// The DISM API of the running system. Uninhabited off Windows.
    #[derive(Debug)]
    pub enum SystemDism {}

    impl SystemDism {
        /// Bind to the system DISM API.
        ///
        /// # Errors
        ///
        /// Always returns [`WimError::Unsupported`] on this platform.
        pub fn new() -> WimResult<Self> {
            Err(WimError::Unsupported {
                feature: "DISM image mounting".to_string(),
            })
        }
    }

    impl DismApi for SystemDism {
        fn initialize(
            &self,
            _log_level: LogLevel,
            _log_path: Option<&Path>,
            _scratch_dir: Option<&Path>,
        ) -> Result<(), NativeStatus> {
            match *self {}
        }

        fn shutdown(&self) -> Result<(), NativeStatus> {
            match *self {}
        }

        fn mount_image(
            &self,
            _image: &Path,
            _mount_dir: &Path,
            _index: u32,
            _access: MountAccess,
            _cancel: CancelHandle,
            _progress: Option<&ProgressTrampoline<'_>>,
        ) -> Result<(), NativeStatus> {
            match *self {}
        }

        fn unmount_image(
            &self,
            _mount_dir: &Path,
            _mode: UnmountMode,
            _cancel: CancelHandle,
            _progress: Option<&ProgressTrampoline<'_>>,
        ) -> Result<(), NativeStatus> {
            match *self {}
        }

        fn cleanup_mountpoints(&self) -> Result<(), NativeStatus> {
            match *self {}
        }
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    #[test]
    fn system_dism_is_unsupported_off_windows() {
        assert!(matches!(
            SystemDism::new(),
            Err(wimkit_common::WimError::Unsupported { .. })
        ));
    }
}
