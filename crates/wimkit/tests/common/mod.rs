//! Shared fixtures for wimkit integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use wimkit::imaging::native::{MountAccess, UnmountMode};
use wimkit::imaging::{CancelHandle, DismApi, LogLevel, NativeStatus, ProgressTrampoline};

/// Native calls observed by [`FakeDism`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initialize,
    Shutdown,
    Mount { index: u32, access: MountAccess },
    Unmount(UnmountMode),
    Cleanup,
}

/// In-memory DISM: a mount materializes a small Windows tree in the mount
/// directory and an unmount empties it again.
#[derive(Default)]
pub struct FakeDism {
    pub calls: Mutex<Vec<Call>>,
    busy_unmounts: Mutex<u32>,
}

impl FakeDism {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the mount directory busy for the next `count` unmounts.
    pub fn with_busy_unmounts(count: u32) -> Self {
        Self {
            busy_unmounts: Mutex::new(count),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn mount_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Mount { .. }))
            .count()
    }
}

impl DismApi for FakeDism {
    fn initialize(
        &self,
        _log_level: LogLevel,
        _log_path: Option<&Path>,
        _scratch_dir: Option<&Path>,
    ) -> Result<(), NativeStatus> {
        self.calls.lock().push(Call::Initialize);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), NativeStatus> {
        self.calls.lock().push(Call::Shutdown);
        Ok(())
    }

    fn mount_image(
        &self,
        _image: &Path,
        mount_dir: &Path,
        index: u32,
        access: MountAccess,
        _cancel: CancelHandle,
        progress: Option<&ProgressTrampoline<'_>>,
    ) -> Result<(), NativeStatus> {
        self.calls.lock().push(Call::Mount { index, access });
        let system32 = mount_dir.join("Windows").join("System32");
        fs::create_dir_all(&system32).map_err(|e| NativeStatus::new(0x8007_0005, e.to_string()))?;
        fs::write(system32.join("ntoskrnl.exe"), b"MZ")
            .map_err(|e| NativeStatus::new(0x8007_0005, e.to_string()))?;
        if let Some(progress) = progress {
            for step in [0, 50, 100] {
                progress.tick(step, 100);
            }
        }
        Ok(())
    }

    fn unmount_image(
        &self,
        mount_dir: &Path,
        mode: UnmountMode,
        _cancel: CancelHandle,
        _progress: Option<&ProgressTrampoline<'_>>,
    ) -> Result<(), NativeStatus> {
        self.calls.lock().push(Call::Unmount(mode));
        {
            let mut busy = self.busy_unmounts.lock();
            if *busy > 0 {
                *busy -= 1;
                return Err(NativeStatus::new(0xC142_0117, "The directory is in use."));
            }
        }
        for entry in fs::read_dir(mount_dir).map_err(|e| NativeStatus::new(0x8007_0003, e.to_string()))? {
            let path = entry
                .map_err(|e| NativeStatus::new(0x8007_0003, e.to_string()))?
                .path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| NativeStatus::new(0x8007_0020, e.to_string()))?;
        }
        Ok(())
    }

    fn cleanup_mountpoints(&self) -> Result<(), NativeStatus> {
        self.calls.lock().push(Call::Cleanup);
        Ok(())
    }
}

/// Write a placeholder container file.
pub fn image_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"MSWIM\0\0\0").unwrap();
    path
}

/// Whether `dir` exists and holds no entries.
pub fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false)
}
