//! Wide-string helpers shared by the Windows bindings.
#![allow(unsafe_code)]

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

/// NUL-terminated UTF-16 copy of `path`.
pub fn wide(path: &Path) -> Vec<u16> {
    wide_str(path.as_os_str())
}

/// NUL-terminated UTF-16 copy of `s`.
pub fn wide_str(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// [`wide`] for an optional path.
pub fn wide_opt(path: Option<&Path>) -> Option<Vec<u16>> {
    path.map(wide)
}

/// Copy a NUL-terminated UTF-16 string.
///
/// # Safety
///
/// `ptr` must be null or point at a NUL-terminated UTF-16 string.
pub unsafe fn from_wide_ptr(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0;
    // SAFETY: caller guarantees NUL termination.
    unsafe {
        while *ptr.add(len) != 0 {
            len += 1;
        }
        String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
    }
}
