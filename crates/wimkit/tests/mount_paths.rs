//! Mount path collisions across different spellings of one directory.
//!
//! Kept in its own test binary: it changes the working directory.

mod common;

use common::{FakeDism, image_file};
use tempfile::tempdir;
use wimkit::imaging::{NativeImageService, ServiceOptions};
use wimkit::mount::{MountRegistry, MountRequest};
use wimkit_common::WimError;

#[test]
fn relative_absolute_and_dotdot_spellings_collide() {
    let temp = tempdir().unwrap();
    let image = image_file(temp.path(), "install.wim");
    std::fs::create_dir(temp.path().join("x")).unwrap();
    std::env::set_current_dir(temp.path()).unwrap();

    let mut service = NativeImageService::new(FakeDism::new(), ServiceOptions::default());
    service.initialize().unwrap();
    let mut registry = MountRegistry::new();
    let request = |mount_path| MountRequest {
        image_path: image.clone(),
        index: 1,
        mount_path,
        read_only: true,
    };

    let record = registry
        .mount(&service, &request(temp.path().join("mnt")), None)
        .unwrap();

    for spelling in ["mnt".into(), "./mnt/".into(), temp.path().join("x/../mnt")] {
        let err = registry
            .mount(&service, &request(spelling.clone()), None)
            .unwrap_err();
        assert!(
            matches!(err, WimError::MountPathInUse { .. }),
            "{}",
            spelling.display()
        );
        assert_eq!(registry.find_by_path(&spelling), Some(&record));
    }
    assert_eq!(service.api().mount_calls(), 1);
    assert_eq!(registry.active().count(), 1);

    let forgotten = registry.forget("x/../mnt".as_ref()).unwrap();
    assert_eq!(forgotten.mount_id(), record.mount_id());
}

#[test]
fn mount_records_keep_an_absolute_path() {
    let temp = tempdir().unwrap();
    let image = image_file(temp.path(), "boot.wim");
    let mut service = NativeImageService::new(FakeDism::new(), ServiceOptions::default());
    service.initialize().unwrap();
    let mut registry = MountRegistry::new();

    let mount_path = temp.path().join("sub/../mnt");
    let record = registry
        .mount(
            &service,
            &MountRequest {
                image_path: image,
                index: 1,
                mount_path,
                read_only: false,
            },
            None,
        )
        .unwrap();

    assert!(record.mount_path().is_absolute());
    assert_eq!(record.mount_path(), temp.path().join("mnt"));
}
