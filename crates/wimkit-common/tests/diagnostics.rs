//! Public surface of the shared types as seen by downstream crates.

use std::path::PathBuf;

use miette::Diagnostic;
use wimkit_common::{Compression, ImageGuid, WimError, WimkitPaths};

#[test]
fn diagnostics_carry_stable_codes() {
    let cases = [
        (WimError::native("mount image", 0xC142_0117, "busy"), "wimkit::native"),
        (
            WimError::MountPathInUse {
                path: PathBuf::from("/mnt/1"),
            },
            "wimkit::mount::path_in_use",
        ),
        (
            WimError::UnknownCompression {
                name: "zstd".to_string(),
            },
            "wimkit::export::unknown_compression",
        ),
    ];

    for (err, code) in cases {
        assert_eq!(err.code().map(|c| c.to_string()).as_deref(), Some(code));
    }
}

#[test]
fn guid_directory_is_stable_across_parse_forms() {
    let braced: ImageGuid = "{5F0C9A1E-3B7D-4C2A-9E61-0D8F7B2A4C11}".parse().unwrap();
    let bare: ImageGuid = "5f0c9a1e-3b7d-4c2a-9e61-0d8f7b2a4c11".parse().unwrap();

    assert_eq!(braced, bare);
    assert_eq!(braced.dir_name(), "5f0c9a1e-3b7d-4c2a-9e61-0d8f7b2a4c11");
}

#[test]
fn layout_under_custom_root() {
    let temp = tempfile::tempdir().unwrap();
    let paths = WimkitPaths::with_root(temp.path().join("wimkit"));
    paths.create_dirs().unwrap();

    for dir in [paths.mounts(), paths.state(), paths.scratch(), paths.logs()] {
        assert!(dir.is_dir(), "{}", dir.display());
        assert!(dir.starts_with(temp.path()));
    }
    assert_eq!(paths.native_log().parent(), Some(paths.logs().as_path()));
}

#[test]
fn compression_aliases_resolve() {
    assert_eq!("LZX".parse::<Compression>().unwrap(), Compression::Maximum);
    assert_eq!("xpress".parse::<Compression>().unwrap(), Compression::Fast);
    assert!("deflate".parse::<Compression>().is_err());
}
