//! Authority mode resolution against live platform state.

use ownerkit_core::{AuthorityMode, ProxyError};
use ownerkit_testkit::{TestPlatform, HOST_PACKAGE};

#[test]
fn no_owner_and_no_broker_resolves_none() {
    let platform = TestPlatform::new();
    let proxy = platform.proxy().unwrap();

    assert_eq!(proxy.mode(), AuthorityMode::None);
    assert!(!proxy.is_available());
    assert_eq!(
        platform.broker.init_calls(),
        0,
        "broker library must not be touched when the broker is not installed"
    );
}

#[test]
fn device_owner_wins_over_an_authorized_broker() {
    let platform = TestPlatform::new()
        .as_device_owner()
        .with_authorized_broker();
    let proxy = platform.proxy().unwrap();

    assert_eq!(proxy.mode(), AuthorityMode::Direct);
    assert_eq!(platform.broker.init_calls(), 0);
}

#[test]
fn authorized_broker_resolves_delegated_and_initializes_once() {
    let platform = TestPlatform::new().with_authorized_broker();
    let proxy = platform.proxy().unwrap();

    for _ in 0..3 {
        assert_eq!(proxy.mode(), AuthorityMode::Delegated);
    }
    assert_eq!(platform.broker.init_calls(), 1);
    assert_eq!(proxy.broker().cached_initialization(), Some(true));
}

#[test]
fn installed_broker_without_permission_resolves_none() {
    let platform = TestPlatform::new().with_authorized_broker();
    platform.broker.set_granted(false);
    let proxy = platform.proxy().unwrap();

    assert_eq!(proxy.mode(), AuthorityMode::None);
}

#[test]
fn failed_initialization_is_retried() {
    let platform = TestPlatform::new().with_authorized_broker();
    platform.broker.set_init_result(Ok(false));
    let proxy = platform.proxy().unwrap();

    assert_eq!(proxy.mode(), AuthorityMode::None);
    assert_eq!(proxy.mode(), AuthorityMode::None);
    assert_eq!(platform.broker.init_calls(), 2);

    platform.broker.set_init_result(Ok(true));
    assert_eq!(proxy.mode(), AuthorityMode::Delegated);
    assert_eq!(platform.broker.init_calls(), 3);
}

#[test]
fn initialization_errors_are_logged_and_resolve_none() {
    let platform = TestPlatform::new().with_authorized_broker();
    platform
        .broker
        .set_init_result(Err(ProxyError::broker("library missing")));
    let proxy = platform.proxy().unwrap();

    assert_eq!(proxy.mode(), AuthorityMode::None);
    assert!(platform.log.contains("Broker initialization failed"));
}

#[test]
fn mode_tracks_ownership_changes_without_caching() {
    let platform = TestPlatform::new();
    let proxy = platform.proxy().unwrap();
    assert_eq!(proxy.mode(), AuthorityMode::None);

    platform.device_policy.set_device_owner(Some(HOST_PACKAGE));
    assert_eq!(proxy.mode(), AuthorityMode::Direct);

    platform.device_policy.set_device_owner(Some("com.other.owner"));
    assert_eq!(proxy.mode(), AuthorityMode::None);
}

#[test]
fn uninstalling_the_broker_drops_delegation() {
    let platform = TestPlatform::new().with_authorized_broker();
    let proxy = platform.proxy().unwrap();
    assert_eq!(proxy.mode(), AuthorityMode::Delegated);

    platform
        .packages
        .set_installed(&platform.config.broker_package, false);
    assert_eq!(proxy.mode(), AuthorityMode::None);
}

#[test]
fn each_resolution_checks_the_broker_package_once() {
    let platform = TestPlatform::new().with_authorized_broker();
    let proxy = platform.proxy().unwrap();
    let before = platform.packages.queries();

    assert_eq!(proxy.mode(), AuthorityMode::Delegated);
    assert_eq!(platform.packages.queries(), before + 1);
    assert_eq!(proxy.mode(), AuthorityMode::Delegated);
    assert_eq!(platform.packages.queries(), before + 2);
}
