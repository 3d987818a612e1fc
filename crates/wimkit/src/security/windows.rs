//! Windows ownership backend: SDDL snapshots of owner and DACL.
#![allow(unsafe_code)]

use std::ffi::{OsStr, c_void};
use std::io;
use std::path::Path;
use std::ptr;

use ::windows::Win32::Foundation::{
    BOOL, CloseHandle, ERROR_NOT_ALL_ASSIGNED, ERROR_SUCCESS, GENERIC_ALL, GetLastError, HANDLE,
    HLOCAL, LUID, LocalFree, WIN32_ERROR,
};
use ::windows::Win32::Security::Authorization::{
    ConvertSecurityDescriptorToStringSecurityDescriptorW,
    ConvertStringSecurityDescriptorToSecurityDescriptorW, EXPLICIT_ACCESS_W, GRANT_ACCESS,
    GetNamedSecurityInfoW, NO_MULTIPLE_TRUSTEE, SDDL_REVISION_1, SE_FILE_OBJECT,
    SetEntriesInAclW, SetNamedSecurityInfoW, TRUSTEE_IS_SID, TRUSTEE_IS_USER, TRUSTEE_W,
};
use ::windows::Win32::Security::{
    ACE_FLAGS, ACL, AdjustTokenPrivileges, DACL_SECURITY_INFORMATION, GetSecurityDescriptorControl,
    GetSecurityDescriptorDacl, GetSecurityDescriptorOwner, GetTokenInformation,
    LUID_AND_ATTRIBUTES, LookupPrivilegeValueW, NO_INHERITANCE, OBJECT_SECURITY_INFORMATION,
    OWNER_SECURITY_INFORMATION, PROTECTED_DACL_SECURITY_INFORMATION, PSECURITY_DESCRIPTOR, PSID,
    SE_DACL_PROTECTED, SE_PRIVILEGE_ENABLED, SUB_CONTAINERS_AND_OBJECTS_INHERIT,
    TOKEN_ACCESS_MASK, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY, TOKEN_USER, TokenUser,
    UNPROTECTED_DACL_SECURITY_INFORMATION,
};
use ::windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};
use ::windows::core::{PCWSTR, PWSTR, w};
use wimkit_common::{WimError, WimResult};

use super::{SecurityApi, SecurityDescriptor};
use crate::win::{from_wide_ptr, wide, wide_str};

/// Privileges needed to reassign owners we do not hold.
const PRIVILEGES: [PCWSTR; 2] = [
    w!("SeTakeOwnershipPrivilege"),
    w!("SeRestorePrivilege"),
];

fn win32(operation: &str, status: WIN32_ERROR) -> WimResult<()> {
    if status == ERROR_SUCCESS {
        return Ok(());
    }
    let message = io::Error::from_raw_os_error(i32::from_ne_bytes(status.0.to_ne_bytes())).to_string();
    Err(WimError::native(operation, status.0, message))
}

fn hresult(operation: &str, err: &::windows::core::Error) -> WimError {
    WimError::native(
        operation,
        u32::from_ne_bytes(err.code().0.to_ne_bytes()),
        err.message(),
    )
}

/// Memory owned by `LocalAlloc`, released on drop.
struct LocalBox(*mut c_void);

impl Drop for LocalBox {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: the pointer came from an API documented to return
            // LocalAlloc memory and is freed exactly once.
            unsafe {
                let _ = LocalFree(HLOCAL(self.0));
            }
        }
    }
}

/// Process token handle, closed on drop.
struct Token(HANDLE);

impl Token {
    fn open(access: TOKEN_ACCESS_MASK) -> WimResult<Self> {
        let mut handle = HANDLE::default();
        // SAFETY: the pseudo-handle from GetCurrentProcess needs no close.
        unsafe { OpenProcessToken(GetCurrentProcess(), access, &mut handle) }
            .map_err(|e| hresult("open process token", &e))?;
        Ok(Self(handle))
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        // SAFETY: handle was opened by OpenProcessToken.
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Ownership backend of the running system.
///
/// Holds the process user SID; construction also enables the
/// take-ownership and restore privileges when the token has them.
#[derive(Debug)]
pub struct SystemSecurity {
    // TOKEN_USER followed by its SID; u64 keeps the pointer alignment.
    token_user: Vec<u64>,
}

impl SystemSecurity {
    /// Bind to the platform security calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the process token cannot be queried.
    pub fn new() -> WimResult<Self> {
        let token = Token::open(TOKEN_QUERY | TOKEN_ADJUST_PRIVILEGES)?;
        let token_user = query_token_user(&token)?;
        for privilege in PRIVILEGES {
            if let Err(err) = enable_privilege(&token, privilege) {
                // SAFETY: PRIVILEGES holds static NUL-terminated literals.
                let name = unsafe { from_wide_ptr(privilege.0) };
                tracing::warn!(privilege = %name, error = %err, "Privilege not enabled");
            }
        }
        Ok(Self { token_user })
    }

    fn user_sid(&self) -> PSID {
        // SAFETY: token_user was filled by GetTokenInformation(TokenUser).
        unsafe { (*self.token_user.as_ptr().cast::<TOKEN_USER>()).User.Sid }
    }
}

fn query_token_user(token: &Token) -> WimResult<Vec<u64>> {
    let mut needed = 0u32;
    // SAFETY: size probe with no buffer; the expected failure is ignored.
    let _ = unsafe { GetTokenInformation(token.0, TokenUser, None, 0, &mut needed) };
    let mut buffer = vec![0u64; (needed as usize).div_ceil(8).max(1)];
    // SAFETY: buffer holds at least `needed` bytes.
    unsafe {
        GetTokenInformation(
            token.0,
            TokenUser,
            Some(buffer.as_mut_ptr().cast()),
            needed,
            &mut needed,
        )
    }
    .map_err(|e| hresult("query token user", &e))?;
    Ok(buffer)
}

fn enable_privilege(token: &Token, name: PCWSTR) -> WimResult<()> {
    let mut luid = LUID::default();
    // SAFETY: name is NUL-terminated; luid is a valid out pointer.
    unsafe { LookupPrivilegeValueW(PCWSTR::null(), name, &mut luid) }
        .map_err(|e| hresult("lookup privilege", &e))?;
    let privileges = TOKEN_PRIVILEGES {
        PrivilegeCount: 1,
        Privileges: [LUID_AND_ATTRIBUTES {
            Luid: luid,
            Attributes: SE_PRIVILEGE_ENABLED,
        }],
    };
    // SAFETY: privileges is a valid single-entry TOKEN_PRIVILEGES.
    unsafe { AdjustTokenPrivileges(token.0, BOOL::from(false), Some(&privileges), 0, None, None) }
        .map_err(|e| hresult("adjust token privileges", &e))?;
    // AdjustTokenPrivileges succeeds with ERROR_NOT_ALL_ASSIGNED.
    // SAFETY: reads the calling thread's last-error slot.
    if unsafe { GetLastError() } == ERROR_NOT_ALL_ASSIGNED {
        return Err(WimError::PermissionDenied {
            operation: "enable privilege".to_string(),
        });
    }
    Ok(())
}

/// Security descriptor read from a path, freed on drop.
struct NamedDescriptor {
    descriptor: LocalBox,
    dacl: *mut ACL,
}

fn read_descriptor(path: &Path, info: OBJECT_SECURITY_INFORMATION) -> WimResult<NamedDescriptor> {
    let name = wide(path);
    let mut dacl: *mut ACL = ptr::null_mut();
    let mut descriptor = PSECURITY_DESCRIPTOR::default();
    // SAFETY: name is NUL-terminated; out pointers are valid.
    let status = unsafe {
        GetNamedSecurityInfoW(
            PCWSTR(name.as_ptr()),
            SE_FILE_OBJECT,
            info,
            None,
            None,
            Some(&raw mut dacl),
            None,
            &mut descriptor,
        )
    };
    let descriptor = LocalBox(descriptor.0);
    win32("read security descriptor", status)?;
    Ok(NamedDescriptor { descriptor, dacl })
}

impl SecurityApi for SystemSecurity {
    fn capture(&self, path: &Path) -> WimResult<SecurityDescriptor> {
        let info = OWNER_SECURITY_INFORMATION | DACL_SECURITY_INFORMATION;
        let named = read_descriptor(path, info)?;
        let mut sddl = PWSTR::null();
        // SAFETY: the descriptor is valid until `named` drops.
        unsafe {
            ConvertSecurityDescriptorToStringSecurityDescriptorW(
                PSECURITY_DESCRIPTOR(named.descriptor.0),
                SDDL_REVISION_1,
                info,
                &mut sddl,
                None,
            )
        }
        .map_err(|e| hresult("format security descriptor", &e))?;
        let sddl = LocalBox(sddl.0.cast());
        // SAFETY: the conversion produced a NUL-terminated string.
        Ok(SecurityDescriptor::new(unsafe { from_wide_ptr(sddl.0.cast()) }))
    }

    fn take_ownership(&self, path: &Path) -> WimResult<()> {
        let name = wide(path);
        // SAFETY: name is NUL-terminated; the SID lives in self.
        let status = unsafe {
            SetNamedSecurityInfoW(
                PCWSTR(name.as_ptr()),
                SE_FILE_OBJECT,
                OWNER_SECURITY_INFORMATION,
                self.user_sid(),
                PSID::default(),
                None,
                None,
            )
        };
        win32("take ownership", status)
    }

    fn grant_full_control(&self, path: &Path, is_directory: bool) -> WimResult<()> {
        let current = read_descriptor(path, DACL_SECURITY_INFORMATION)?;
        let inheritance: ACE_FLAGS = if is_directory {
            SUB_CONTAINERS_AND_OBJECTS_INHERIT
        } else {
            NO_INHERITANCE
        };
        let entry = EXPLICIT_ACCESS_W {
            grfAccessPermissions: GENERIC_ALL.0,
            grfAccessMode: GRANT_ACCESS,
            grfInheritance: inheritance,
            Trustee: TRUSTEE_W {
                pMultipleTrustee: ptr::null_mut(),
                MultipleTrusteeOperation: NO_MULTIPLE_TRUSTEE,
                TrusteeForm: TRUSTEE_IS_SID,
                TrusteeType: TRUSTEE_IS_USER,
                ptstrName: PWSTR(self.user_sid().0.cast()),
            },
        };
        let mut merged: *mut ACL = ptr::null_mut();
        // SAFETY: the old DACL belongs to `current`, alive across the call.
        let status = unsafe { SetEntriesInAclW(Some(&[entry]), Some(current.dacl.cast_const()), &mut merged) };
        let merged = LocalBox(merged.cast());
        win32("merge access control list", status)?;

        let name = wide(path);
        // SAFETY: merged is a valid ACL until it drops.
        let status = unsafe {
            SetNamedSecurityInfoW(
                PCWSTR(name.as_ptr()),
                SE_FILE_OBJECT,
                DACL_SECURITY_INFORMATION,
                PSID::default(),
                PSID::default(),
                Some(merged.0.cast::<ACL>().cast_const()),
                None,
            )
        };
        win32("grant full control", status)
    }

    fn apply(&self, path: &Path, descriptor: &SecurityDescriptor) -> WimResult<()> {
        let sddl = wide_str(OsStr::new(descriptor.as_str()));
        let mut parsed = PSECURITY_DESCRIPTOR::default();
        // SAFETY: sddl is NUL-terminated; parsed receives LocalAlloc memory.
        unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                PCWSTR(sddl.as_ptr()),
                SDDL_REVISION_1,
                &mut parsed,
                None,
            )
        }
        .map_err(|e| hresult("parse security descriptor", &e))?;
        let parsed = LocalBox(parsed.0);
        let sd = PSECURITY_DESCRIPTOR(parsed.0);

        let mut owner = PSID::default();
        let mut dacl: *mut ACL = ptr::null_mut();
        let mut present = BOOL::default();
        let mut defaulted = BOOL::default();
        let mut control = 0u16;
        let mut revision = 0u32;
        // SAFETY: sd is a valid self-relative descriptor until `parsed` drops.
        unsafe {
            GetSecurityDescriptorOwner(sd, &mut owner, &mut defaulted)
                .map_err(|e| hresult("read descriptor owner", &e))?;
            GetSecurityDescriptorDacl(sd, &mut present, &mut dacl, &mut defaulted)
                .map_err(|e| hresult("read descriptor DACL", &e))?;
            GetSecurityDescriptorControl(sd, &mut control, &mut revision)
                .map_err(|e| hresult("read descriptor control", &e))?;
        }

        let mut info = OWNER_SECURITY_INFORMATION | DACL_SECURITY_INFORMATION;
        info |= if control & SE_DACL_PROTECTED.0 == 0 {
            UNPROTECTED_DACL_SECURITY_INFORMATION
        } else {
            PROTECTED_DACL_SECURITY_INFORMATION
        };
        let name = wide(path);
        // SAFETY: owner and dacl point into `parsed`.
        let status = unsafe {
            SetNamedSecurityInfoW(
                PCWSTR(name.as_ptr()),
                SE_FILE_OBJECT,
                info,
                owner,
                PSID::default(),
                present.as_bool().then_some(dacl.cast_const()),
                None,
            )
        };
        win32("restore security descriptor", status)
    }
}
