//! Install session lifecycle across authority modes and delegated routes.

use std::io::{Cursor, Write};
use std::sync::Arc;

use ownerkit_core::effects::{FLAG_MUTABLE, FLAG_UPDATE_CURRENT};
use ownerkit_core::schema::package_installer;
use ownerkit_core::{
    sdk, AuthorityMode, ComponentName, DelegatedRoute, ProxyError, SessionParams, SessionState,
};
use ownerkit_proxy::InstallServiceListener;
use ownerkit_testkit::{Surface, TestPlatform};
use zip::write::FileOptions;

fn package_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn bundle(members: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    Cursor::new(writer.finish().unwrap().into_inner())
}

struct QuietListener;

impl InstallServiceListener for QuietListener {}

fn install_service_component() -> ComponentName {
    ComponentName::new("com.example.ownerapp", "com.example.ownerapp.InstallService")
}

#[test]
fn direct_install_writes_syncs_and_commits_locally() {
    let platform = TestPlatform::new().as_device_owner();
    let proxy = platform.proxy().unwrap();
    let data = package_bytes(200_000);

    let receipt = proxy
        .installer()
        .install_package(Some(data.len() as u64), &mut Cursor::new(data.clone()))
        .unwrap();

    assert_eq!(receipt.mode, AuthorityMode::Direct);
    assert_eq!(receipt.entries, ["package"]);
    assert_eq!(receipt.bytes_written, data.len() as u64);

    let session = platform.backend.session(receipt.session_id).unwrap();
    assert_eq!(session.params, Some(SessionParams::full_install()));
    assert_eq!(session.entries["package"], data);
    assert_eq!(session.synced, ["package"]);
    assert_eq!(session.commits, [Surface::Local]);
    assert!(session.abandons.is_empty());
    assert_eq!(
        platform.delivery.requests(),
        [(receipt.session_id, FLAG_UPDATE_CURRENT)]
    );
    assert_eq!(
        proxy.installer().session_state(receipt.session_id),
        Some(SessionState::Committed)
    );
}

#[test]
fn status_target_is_mutable_from_api_31() {
    let platform = TestPlatform::with_sdk(sdk::S).as_device_owner();
    let proxy = platform.proxy().unwrap();

    let receipt = proxy
        .installer()
        .install_package(None, &mut Cursor::new(package_bytes(10)))
        .unwrap();
    assert_eq!(
        platform.delivery.requests(),
        [(receipt.session_id, FLAG_UPDATE_CURRENT | FLAG_MUTABLE)]
    );
}

#[test]
fn install_without_authority_uses_the_local_installer() {
    let platform = TestPlatform::new();
    let proxy = platform.proxy().unwrap();

    let receipt = proxy
        .installer()
        .install_package(None, &mut Cursor::new(package_bytes(64)))
        .unwrap();
    assert_eq!(receipt.mode, AuthorityMode::None);
    let session = platform.backend.session(receipt.session_id).unwrap();
    assert_eq!(session.commits, [Surface::Local]);
}

#[test]
fn write_failure_abandons_exactly_once_and_never_commits() {
    let platform = TestPlatform::new().as_device_owner();
    platform.backend.fail_write_after(Some(1_000));
    let proxy = platform.proxy().unwrap();

    let err = proxy
        .installer()
        .install_package(None, &mut Cursor::new(package_bytes(50_000)))
        .unwrap_err();
    assert!(matches!(err, ProxyError::Io { .. }), "got {err:?}");

    let ids = platform.backend.session_ids();
    assert_eq!(ids.len(), 1);
    let session = platform.backend.session(ids[0]).unwrap();
    assert_eq!(session.abandons, [Surface::Local]);
    assert!(session.commits.is_empty());
    assert!(platform.delivery.requests().is_empty());
    assert_eq!(
        proxy.installer().session_state(ids[0]),
        Some(SessionState::Abandoned)
    );
    assert!(platform.log.contains("write failed"));
}

#[test]
fn archive_without_packages_abandons_and_reports() {
    let platform = TestPlatform::new().as_device_owner();
    let proxy = platform.proxy().unwrap();

    let err = proxy
        .installer()
        .install_archive(bundle(&[("manifest.json", b"{}"), ("icon.png", b"png")]))
        .unwrap_err();
    assert!(matches!(err, ProxyError::NoInstallableEntries));
    assert_eq!(err.to_string(), "No .apk files found in archive");

    let ids = platform.backend.session_ids();
    assert_eq!(ids.len(), 1);
    let session = platform.backend.session(ids[0]).unwrap();
    assert!(session.entries.is_empty());
    assert!(session.commits.is_empty());
    assert_eq!(session.abandons, [Surface::Local]);
}

#[test]
fn archive_packages_share_one_session_and_one_commit() {
    let platform = TestPlatform::new().as_device_owner();
    let proxy = platform.proxy().unwrap();

    let receipt = proxy
        .installer()
        .install_archive(bundle(&[
            ("manifest.json", b"{}"),
            ("base.apk", b"base-bytes"),
            ("config.arm64_v8a.apk", b"abi-bytes"),
            ("config.en.apk", b"locale"),
        ]))
        .unwrap();

    assert_eq!(
        receipt.entries,
        ["base.apk", "config.arm64_v8a.apk", "config.en.apk"]
    );
    assert_eq!(platform.backend.session_ids(), [receipt.session_id]);
    let session = platform.backend.session(receipt.session_id).unwrap();
    assert_eq!(session.entries["base.apk"], b"base-bytes");
    assert_eq!(session.entries["config.en.apk"], b"locale");
    assert_eq!(session.commits, [Surface::Local]);
}

#[test]
fn corrupt_archive_fails_before_creating_a_session() {
    let platform = TestPlatform::new().as_device_owner();
    let proxy = platform.proxy().unwrap();

    let err = proxy
        .installer()
        .install_archive(Cursor::new(b"not a zip file".to_vec()))
        .unwrap_err();
    assert!(matches!(err, ProxyError::Io { .. }));
    assert!(platform.backend.session_ids().is_empty());
}

#[test]
fn abandon_is_idempotent_and_blocks_commit() {
    let platform = TestPlatform::new().as_device_owner();
    let proxy = platform.proxy().unwrap();
    let installer = proxy.installer();

    let mut session = installer.create_session().unwrap();
    assert!(installer.abandon(&mut session));
    assert!(!installer.abandon(&mut session));

    let err = installer.commit(&mut session).unwrap_err();
    assert!(matches!(
        err,
        ProxyError::SessionState {
            state: SessionState::Abandoned,
            attempted: "commit",
            ..
        }
    ));
    assert!(installer
        .write_entry(&mut session, "late.apk", None, &mut Cursor::new(vec![1u8]))
        .is_err());

    let record = platform.backend.session(session.id()).unwrap();
    assert_eq!(record.abandons, [Surface::Local]);
    assert!(record.commits.is_empty());
    assert!(record.entries.is_empty());
}

#[test]
fn abandon_after_commit_is_a_no_op() {
    let platform = TestPlatform::new().as_device_owner();
    let proxy = platform.proxy().unwrap();
    let installer = proxy.installer();

    let mut session = installer.create_session().unwrap();
    installer
        .write_entry(&mut session, "base.apk", Some(3), &mut Cursor::new(b"abc".to_vec()))
        .unwrap();
    installer.commit(&mut session).unwrap();

    assert!(!installer.abandon(&mut session));
    assert!(installer.commit(&mut session).is_err());
    let record = platform.backend.session(session.id()).unwrap();
    assert!(record.abandons.is_empty());
    assert_eq!(record.commits, [Surface::Local]);
}

#[test]
fn session_creation_failure_is_returned() {
    let platform = TestPlatform::new().as_device_owner();
    platform.backend.fail_create(true);
    let proxy = platform.proxy().unwrap();

    assert!(proxy
        .installer()
        .install_package(None, &mut Cursor::new(package_bytes(8)))
        .is_err());
    assert!(platform.backend.session_ids().is_empty());
}

#[test]
fn delegated_session_is_created_and_written_through_the_broker() {
    let platform = TestPlatform::new().with_authorized_broker();
    let proxy = platform.proxy().unwrap();
    let installer = proxy.installer();

    let mut session = installer.create_session().unwrap();
    assert_eq!(session.mode(), AuthorityMode::Delegated);
    assert_eq!(session.route(), "wrapped-installer");
    // createSession, openSession
    assert_eq!(platform.broker.forwarded_codes(), [1, 3]);
    assert_eq!(platform.broker.wrap_count(), 2);

    installer
        .write_entry(&mut session, "base.apk", Some(4), &mut Cursor::new(b"base".to_vec()))
        .unwrap();
    assert_eq!(platform.broker.forwarded_codes(), [1, 3, 4]);
    let record = platform.backend.session(session.id()).unwrap();
    assert_eq!(record.params, Some(SessionParams::full_install()));
    assert_eq!(record.entries["base.apk"], b"base");
}

#[test]
fn delegated_install_commits_through_the_wrapped_session() {
    let platform = TestPlatform::new().with_authorized_broker();
    let proxy = platform.proxy().unwrap();
    let data = package_bytes(150_000);

    let receipt = proxy
        .installer()
        .install_package(Some(data.len() as u64), &mut Cursor::new(data.clone()))
        .unwrap();

    assert_eq!(receipt.mode, AuthorityMode::Delegated);
    let session = platform.backend.session(receipt.session_id).unwrap();
    assert_eq!(session.entries["package"], data);
    assert_eq!(session.commits, [Surface::Remote]);
    assert!(session.abandons.is_empty());
    // no fsync code on API 27: skipped without a failure report
    assert_eq!(platform.broker.forwarded_codes(), [1, 3, 4, 1]);
    assert_eq!(platform.broker.wrap_count(), 2);
    assert!(platform.log.is_empty());
}

#[test]
fn wrapped_commit_falls_back_to_the_raw_session_once() {
    let platform = TestPlatform::new().with_authorized_broker();
    let proxy = platform.proxy().unwrap();
    let installer = proxy.installer();

    let mut session = installer.create_session().unwrap();
    installer
        .write_entry(&mut session, "base.apk", None, &mut Cursor::new(b"abc".to_vec()))
        .unwrap();
    platform.broker.fail_wrapped_transactions(true);
    installer.commit(&mut session).unwrap();

    let record = platform.backend.session(session.id()).unwrap();
    assert_eq!(record.commits, [Surface::Remote]);
    assert!(record.abandons.is_empty());
    assert_eq!(platform.broker.forwarded_codes(), [1, 3, 4, 1]);
    assert!(platform.log.contains("using standard commit"));
}

#[test]
fn wrapped_installer_abandon_goes_through_the_remote_installer() {
    let platform = TestPlatform::new().with_authorized_broker();
    let proxy = platform.proxy().unwrap();

    let mut session = proxy.installer().create_session().unwrap();
    assert!(proxy.installer().abandon(&mut session));

    let record = platform.backend.session(session.id()).unwrap();
    assert_eq!(record.abandons, [Surface::Remote]);
    assert_eq!(platform.broker.forwarded_codes(), [1, 3, 5]);
}

#[test]
fn wrapped_installer_write_without_open_write_code_abandons() {
    let platform = TestPlatform::with_sdk(sdk::P).with_authorized_broker();
    platform
        .dispatch_table
        .expose(&package_installer::CREATE_SESSION, 1);
    platform
        .dispatch_table
        .expose(&package_installer::OPEN_SESSION, 3);
    platform
        .dispatch_table
        .expose(&package_installer::ABANDON_SESSION, 5);
    let proxy = platform.proxy().unwrap();

    let err = proxy
        .installer()
        .install_package(None, &mut Cursor::new(package_bytes(10)))
        .unwrap_err();
    assert!(matches!(err, ProxyError::OperationRejected { .. }));

    let ids = platform.backend.session_ids();
    let session = platform.backend.session(ids[0]).unwrap();
    assert_eq!(session.abandons, [Surface::Remote]);
    assert!(session.commits.is_empty());
}

fn broker_commit_platform() -> TestPlatform {
    let mut platform = TestPlatform::new().with_authorized_broker();
    platform.config.delegated_route = DelegatedRoute::BrokerCommit;
    platform
}

#[test]
fn broker_commit_route_only_commits_through_the_broker() {
    let platform = broker_commit_platform();
    let proxy = platform.proxy().unwrap();
    let data = package_bytes(4_096);

    let receipt = proxy
        .installer()
        .install_package(Some(4_096), &mut Cursor::new(data.clone()))
        .unwrap();

    let session = platform.backend.session(receipt.session_id).unwrap();
    assert_eq!(session.entries["package"], data);
    assert_eq!(session.commits, [Surface::Remote]);
    assert_eq!(platform.broker.wrap_count(), 1);
    assert_eq!(platform.broker.forwarded_codes(), [1]);
    assert!(platform.log.is_empty());
}

#[test]
fn broker_commit_falls_back_to_local_commit_once() {
    let platform = broker_commit_platform();
    platform.broker.fail_wrapped_transactions(true);
    let proxy = platform.proxy().unwrap();

    let receipt = proxy
        .installer()
        .install_package(None, &mut Cursor::new(package_bytes(100)))
        .unwrap();

    let session = platform.backend.session(receipt.session_id).unwrap();
    assert_eq!(session.commits, [Surface::Local]);
    assert!(session.abandons.is_empty());
    assert!(platform.log.contains("using standard commit"));
}

#[test]
fn failed_fallback_commit_abandons_the_session() {
    let platform = broker_commit_platform();
    platform.broker.fail_wrapped_transactions(true);
    platform.backend.fail_local_commit(true);
    let proxy = platform.proxy().unwrap();

    assert!(proxy
        .installer()
        .install_package(None, &mut Cursor::new(package_bytes(100)))
        .is_err());

    let ids = platform.backend.session_ids();
    let session = platform.backend.session(ids[0]).unwrap();
    assert!(session.commits.is_empty());
    assert_eq!(session.abandons, [Surface::Local]);
}

#[test]
fn bound_install_service_carries_the_whole_session() {
    let platform = TestPlatform::new().with_authorized_broker();
    let proxy = platform.proxy().unwrap();
    proxy
        .broker()
        .bind_install_service(&install_service_component(), Arc::new(QuietListener));
    platform
        .broker
        .connect_service(Arc::clone(&platform.install_service) as _);
    assert!(proxy.broker().install_service().is_some());

    let data = package_bytes(80_000);
    let receipt = proxy
        .installer()
        .install_package(None, &mut Cursor::new(data.clone()))
        .unwrap();

    let session = platform.backend.session(receipt.session_id).unwrap();
    assert_eq!(session.params, None);
    assert_eq!(session.entries["package"], data);
    assert_eq!(session.commits, [Surface::Service]);
    assert_eq!(platform.broker.wrap_count(), 0);

    proxy.installer().release_install_service();
    assert!(platform.backend.destroyed());
    assert!(proxy.broker().install_service().is_none());
}

#[test]
fn install_service_write_failure_abandons_through_the_service() {
    let platform = TestPlatform::new().with_authorized_broker();
    platform.backend.fail_write_after(Some(16));
    let proxy = platform.proxy().unwrap();
    proxy
        .broker()
        .bind_install_service(&install_service_component(), Arc::new(QuietListener));
    platform
        .broker
        .connect_service(Arc::clone(&platform.install_service) as _);

    let err = proxy
        .installer()
        .install_package(None, &mut Cursor::new(package_bytes(1_000)))
        .unwrap_err();
    assert!(matches!(err, ProxyError::Remote(_)), "got {err:?}");

    let ids = platform.backend.session_ids();
    let session = platform.backend.session(ids[0]).unwrap();
    assert_eq!(session.abandons, [Surface::Service]);
    assert!(session.commits.is_empty());
}

#[test]
fn install_path_detects_package_kind() {
    let platform = TestPlatform::new().as_device_owner();
    let proxy = platform.proxy().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let apk = dir.path().join("app.apk");
    std::fs::write(&apk, package_bytes(300)).unwrap();
    let receipt = proxy.installer().install_path(&apk, None).unwrap();
    assert_eq!(receipt.entries, ["package"]);
    assert_eq!(receipt.bytes_written, 300);

    let xapk = dir.path().join("bundle.xapk");
    std::fs::write(&xapk, bundle(&[("base.apk", b"base")]).into_inner()).unwrap();
    let receipt = proxy.installer().install_path(&xapk, None).unwrap();
    assert_eq!(receipt.entries, ["base.apk"]);

    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, b"hello").unwrap();
    let err = proxy
        .installer()
        .install_path(&notes, Some("text/plain"))
        .unwrap_err();
    assert!(err.to_string().contains("Unknown file type"));
    assert_eq!(platform.backend.session_ids().len(), 2);
}
