//! ownerkit Testing Infrastructure
//!
//! In-memory fakes for every effect interface the proxy is written against,
//! plus remote stubs that decode real request parcels. [`TestPlatform`]
//! wires them together:
//!
//! ```rust,no_run
//! use ownerkit_testkit::TestPlatform;
//!
//! let platform = TestPlatform::new().with_authorized_broker();
//! let proxy = platform.proxy().unwrap();
//! assert!(proxy.client().set_hidden("com.example.game", true));
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod ambient;
pub mod binder;
pub mod broker;
pub mod builder;
pub mod installer;
pub mod platform;

pub use ambient::{FailureEntry, InlineMainThread, QueuedMainThread, RecordingFailureLog};
pub use binder::{exception_reply, reply, ScriptedBinder, StubDispatcher, Transaction};
pub use broker::{broker_owner, FakeBroker};
pub use builder::{host_admin, TestPlatform, HOST_PACKAGE};
pub use installer::{
    FakeInstallService, FakeInstaller, FakeResultDelivery, InstallerBackend,
    RemotePackageInstaller, SessionRecord, Surface,
};
pub use platform::{
    FakeDevicePolicy, FakeDispatchTable, FakePackages, FakeServiceRegistry, PolicyCall,
    RemoteDevicePolicy,
};
