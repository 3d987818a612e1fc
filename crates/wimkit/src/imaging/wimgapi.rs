//! WIMGAPI binding for container handles.
#![allow(unsafe_code)]

use wimkit_common::WimResult;

#[cfg(windows)]
pub use self::windows::SystemWim;

#[cfg(not(windows))]
pub use self::unsupported::SystemWim;

/// Base of the WIMGAPI message range (`WM_APP + 0x1476`).
const WIM_MSG: u32 = 0x8000 + 0x1476;
/// Text message; not forwarded.
#[cfg(test)]
const WIM_MSG_TEXT: u32 = WIM_MSG + 1;
/// Percent-complete message, with the percentage in `wparam`.
const WIM_MSG_PROGRESS: u32 = WIM_MSG + 2;

/// The percentage carried by a WIMGAPI message, if it is a progress message.
#[cfg_attr(not(any(windows, test)), allow(dead_code))]
fn progress_percentage(message_id: u32, wparam: usize) -> Option<i32> {
    (message_id == WIM_MSG_PROGRESS).then(|| i32::try_from(wparam.min(100)).unwrap_or(100))
}

#[cfg(windows)]
mod windows {
    use std::ffi::c_void;
    use std::panic::{self, AssertUnwindSafe};
    use std::path::Path;
    use std::ptr;

    use super::{WimResult, progress_percentage};
    use crate::imaging::native::{NativeStatus, OpenOptions, RawHandle, WimApi};
    use crate::imaging::progress::ProgressTrampoline;
    use crate::win::wide;

    type MessageCallback =
        extern "system" fn(message_id: u32, wparam: usize, lparam: isize, user_data: *mut c_void) -> u32;

    const WIM_MSG_SUCCESS: u32 = 0;
    const INVALID_CALLBACK_VALUE: u32 = 0xFFFF_FFFF;

    #[link(name = "wimgapi")]
    unsafe extern "system" {
        fn WIMCreateFile(
            wim_path: *const u16,
            desired_access: u32,
            creation_disposition: u32,
            flags_and_attributes: u32,
            compression_type: u32,
            creation_result: *mut u32,
        ) -> *mut c_void;
        fn WIMSetTemporaryPath(wim: *mut c_void, path: *const u16) -> i32;
        fn WIMLoadImage(wim: *mut c_void, index: u32) -> *mut c_void;
        fn WIMRegisterMessageCallback(
            wim: *mut c_void,
            callback: Option<MessageCallback>,
            user_data: *mut c_void,
        ) -> u32;
        fn WIMUnregisterMessageCallback(wim: *mut c_void, callback: Option<MessageCallback>) -> i32;
        fn WIMExportImage(image: *mut c_void, wim: *mut c_void, flags: u32) -> i32;
        fn WIMCloseHandle(object: *mut c_void) -> i32;
    }

    /// Message trampoline registered with WIMGAPI.
    ///
    /// Runs on a WIMGAPI-owned thread: nothing may unwind out of it.
    extern "system" fn message_trampoline(
        message_id: u32,
        wparam: usize,
        _lparam: isize,
        user_data: *mut c_void,
    ) -> u32 {
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            let Some(percent) = progress_percentage(message_id, wparam) else {
                return;
            };
            if user_data.is_null() {
                return;
            }
            // SAFETY: user_data is the registered `&ProgressTrampoline`,
            // alive until the callback is unregistered.
            let trampoline = unsafe { &*user_data.cast::<ProgressTrampoline<'_>>() };
            trampoline.report_percentage(percent);
        }));
        WIM_MSG_SUCCESS
    }

    fn last_error() -> NativeStatus {
        let err = std::io::Error::last_os_error();
        let code = err.raw_os_error().map_or(0, |c| u32::from_ne_bytes(c.to_ne_bytes()));
        NativeStatus::new(code, err.to_string())
    }

    fn to_ptr(handle: RawHandle) -> *mut c_void {
        handle.0 as *mut c_void
    }

    fn to_handle(ptr: *mut c_void) -> Result<RawHandle, NativeStatus> {
        if ptr.is_null() {
            Err(last_error())
        } else {
            Ok(RawHandle(ptr as isize))
        }
    }

    fn check(ok: i32) -> Result<(), NativeStatus> {
        if ok == 0 { Err(last_error()) } else { Ok(()) }
    }

    /// The WIMGAPI of the running system.
    #[derive(Debug, Default)]
    pub struct SystemWim {
        _private: (),
    }

    impl SystemWim {
        /// Bind to the system WIMGAPI.
        ///
        /// # Errors
        ///
        /// Never fails on Windows.
        pub fn new() -> WimResult<Self> {
            Ok(Self { _private: () })
        }
    }

    impl WimApi for SystemWim {
        fn open_container(
            &self,
            path: &Path,
            options: OpenOptions,
        ) -> Result<RawHandle, NativeStatus> {
            let path = wide(path);
            let mut creation_result = 0u32;
            // SAFETY: path is NUL-terminated; creation_result is a valid out pointer.
            to_handle(unsafe {
                WIMCreateFile(
                    path.as_ptr(),
                    options.access.as_native(),
                    options.disposition.as_native(),
                    options.native_flags(),
                    options.compression.as_native(),
                    &mut creation_result,
                )
            })
        }

        fn set_temporary_path(&self, container: RawHandle, path: &Path) -> Result<(), NativeStatus> {
            let path = wide(path);
            // SAFETY: container is a live WIM handle; path is NUL-terminated.
            check(unsafe { WIMSetTemporaryPath(to_ptr(container), path.as_ptr()) })
        }

        fn load_image(&self, container: RawHandle, index: u32) -> Result<RawHandle, NativeStatus> {
            // SAFETY: container is a live WIM handle.
            to_handle(unsafe { WIMLoadImage(to_ptr(container), index) })
        }

        fn register_progress(
            &self,
            container: RawHandle,
            trampoline: &ProgressTrampoline<'_>,
        ) -> Result<(), NativeStatus> {
            // SAFETY: the trampoline outlives the registration; the export
            // engine unregisters before the borrow ends.
            let result = unsafe {
                WIMRegisterMessageCallback(
                    to_ptr(container),
                    Some(message_trampoline as MessageCallback),
                    ptr::from_ref(trampoline).cast_mut().cast(),
                )
            };
            if result == INVALID_CALLBACK_VALUE {
                Err(last_error())
            } else {
                Ok(())
            }
        }

        fn unregister_progress(&self, container: RawHandle) -> Result<(), NativeStatus> {
            // SAFETY: container is a live WIM handle.
            check(unsafe {
                WIMUnregisterMessageCallback(
                    to_ptr(container),
                    Some(message_trampoline as MessageCallback),
                )
            })
        }

        fn export_image(&self, image: RawHandle, destination: RawHandle) -> Result<(), NativeStatus> {
            // SAFETY: both handles are live.
            check(unsafe { WIMExportImage(to_ptr(image), to_ptr(destination), 0) })
        }

        fn close_handle(&self, handle: RawHandle) -> Result<(), NativeStatus> {
            // SAFETY: each handle is closed exactly once by its owner.
            check(unsafe { WIMCloseHandle(to_ptr(handle)) })
        }
    }
}

#[cfg(not(windows))]
mod unsupported {
    use std::path::Path;

    use wimkit_common::WimError;

    use super::WimResult;
    use crate::imaging::native::{NativeStatus, OpenOptions, RawHandle, WimApi};
    use crate::imaging::progress::ProgressTrampoline;

    /// The WIMGAPI of the running system. Uninhabited off Windows.
    #[derive(Debug)]
    pub enum SystemWim {}

    impl SystemWim {
        /// Bind to the system WIMGAPI.
        ///
        /// # Errors
        ///
        /// Always returns [`WimError::Unsupported`] on this platform.
        pub fn new() -> WimResult<Self> {
            Err(WimError::Unsupported {
                feature: "WIM export".to_string(),
            })
        }
    }

    impl WimApi for SystemWim {
        fn open_container(
            &self,
            _path: &Path,
            _options: OpenOptions,
        ) -> Result<RawHandle, NativeStatus> {
            match *self {}
        }

        fn set_temporary_path(&self, _container: RawHandle, _path: &Path) -> Result<(), NativeStatus> {
            match *self {}
        }

        fn load_image(&self, _container: RawHandle, _index: u32) -> Result<RawHandle, NativeStatus> {
            match *self {}
        }

        fn register_progress(
            &self,
            _container: RawHandle,
            _trampoline: &ProgressTrampoline<'_>,
        ) -> Result<(), NativeStatus> {
            match *self {}
        }

        fn unregister_progress(&self, _container: RawHandle) -> Result<(), NativeStatus> {
            match *self {}
        }

        fn export_image(&self, _image: RawHandle, _destination: RawHandle) -> Result<(), NativeStatus> {
            match *self {}
        }

        fn close_handle(&self, _handle: RawHandle) -> Result<(), NativeStatus> {
            match *self {}
        }
    }
}
