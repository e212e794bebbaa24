//! Wired fake platform for scenario tests

use std::sync::Arc;

use ownerkit_core::effects::MainThreadEffects;
use ownerkit_core::{
    sdk, ComponentName, HostContext, OpcodeResolver, ProxyConfig, Result, WireCodec,
};
use ownerkit_proxy::{OwnerProxy, PlatformHandles};

use crate::ambient::{InlineMainThread, RecordingFailureLog};
use crate::broker::FakeBroker;
use crate::installer::{
    FakeInstallService, FakeInstaller, FakeResultDelivery, InstallerBackend,
    RemotePackageInstaller,
};
use crate::platform::{
    FakeDevicePolicy, FakeDispatchTable, FakePackages, FakeServiceRegistry, RemoteDevicePolicy,
};

/// Package name of the host application under test
pub const HOST_PACKAGE: &str = "com.example.ownerapp";

/// Admin receiver of the host application
pub fn host_admin() -> ComponentName {
    ComponentName::new(HOST_PACKAGE, "com.example.ownerapp.AdminReceiver")
}

/// Every fake, wired together
///
/// Remote stubs decode with the same opcode resolution the proxy uses, so
/// exposing a code in `dispatch_table` affects both sides.
pub struct TestPlatform {
    /// Host identity
    pub host: HostContext,
    /// Proxy configuration
    pub config: ProxyConfig,
    /// Local device policy API
    pub device_policy: Arc<FakeDevicePolicy>,
    /// Device policy service reached through the broker
    pub remote_device_policy: Arc<RemoteDevicePolicy>,
    /// Installed packages
    pub packages: Arc<FakePackages>,
    /// Service registry
    pub services: Arc<FakeServiceRegistry>,
    /// Stub dispatch tables
    pub dispatch_table: Arc<FakeDispatchTable>,
    /// Delegation broker
    pub broker: Arc<FakeBroker>,
    /// Main thread; inline unless replaced
    pub main_thread: Arc<dyn MainThreadEffects>,
    /// Session store behind every installer surface
    pub backend: Arc<InstallerBackend>,
    /// Local installer API
    pub installer: Arc<FakeInstaller>,
    /// Remote package installer stub
    pub remote_installer: Arc<RemotePackageInstaller>,
    /// Broker-hosted install service stub
    pub install_service: Arc<FakeInstallService>,
    /// Result delivery
    pub delivery: Arc<FakeResultDelivery>,
    /// Failure log
    pub log: Arc<RecordingFailureLog>,
    opcodes: Arc<OpcodeResolver>,
}

impl Default for TestPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPlatform {
    /// API 27 platform with default configuration and no authority
    pub fn new() -> Self {
        Self::with_config(sdk::O_MR1, ProxyConfig::default())
    }

    /// Platform on `sdk_level`
    pub fn with_sdk(sdk_level: u32) -> Self {
        Self::with_config(sdk_level, ProxyConfig::default())
    }

    /// Platform on `sdk_level` using `config`
    pub fn with_config(sdk_level: u32, config: ProxyConfig) -> Self {
        let host = HostContext::new(HOST_PACKAGE, host_admin(), sdk_level);
        let codec = WireCodec::new(sdk_level);
        let dispatch_table = Arc::new(FakeDispatchTable::new());
        let opcodes = Arc::new(OpcodeResolver::standard(
            Arc::clone(&dispatch_table) as _,
            config.fallback_table(),
            sdk_level,
        ));

        let device_policy = Arc::new(FakeDevicePolicy::new());
        let remote_device_policy =
            RemoteDevicePolicy::new(Arc::clone(&device_policy), Arc::clone(&opcodes), codec);
        let backend = InstallerBackend::new();
        let remote_installer =
            RemotePackageInstaller::new(Arc::clone(&backend), Arc::clone(&opcodes), codec);
        let installer = Arc::new(FakeInstaller::new(
            Arc::clone(&backend),
            Arc::clone(&remote_installer),
        ));
        let install_service =
            FakeInstallService::new(Arc::clone(&backend), Arc::clone(&opcodes), codec);

        let services = Arc::new(FakeServiceRegistry::new());
        services.register("device_policy", Arc::clone(&remote_device_policy) as _);
        services.set_package_installer(Some(Arc::clone(&remote_installer) as _));

        Self {
            host,
            config,
            device_policy,
            remote_device_policy,
            packages: Arc::new(FakePackages::new()),
            services,
            dispatch_table,
            broker: Arc::new(FakeBroker::new()),
            main_thread: Arc::new(InlineMainThread::new()),
            backend,
            installer,
            remote_installer,
            install_service,
            delivery: Arc::new(FakeResultDelivery::new()),
            log: Arc::new(RecordingFailureLog::new()),
            opcodes,
        }
    }

    /// Make the host the device owner
    pub fn as_device_owner(self) -> Self {
        self.device_policy.set_device_owner(Some(HOST_PACKAGE));
        self
    }

    /// Install the broker and grant its permission
    pub fn with_authorized_broker(self) -> Self {
        self.packages.set_installed(&self.config.broker_package, true);
        self.broker.set_granted(true);
        self
    }

    /// Replace the main thread
    pub fn with_main_thread(mut self, main_thread: Arc<dyn MainThreadEffects>) -> Self {
        self.main_thread = main_thread;
        self
    }

    /// Opcode resolution shared by the remote stubs
    pub fn opcodes(&self) -> Arc<OpcodeResolver> {
        Arc::clone(&self.opcodes)
    }

    /// Effect handles for [`OwnerProxy::new`]
    pub fn handles(&self) -> PlatformHandles {
        PlatformHandles {
            device_policy: Arc::clone(&self.device_policy) as _,
            packages: Arc::clone(&self.packages) as _,
            services: Arc::clone(&self.services) as _,
            dispatch_table: Arc::clone(&self.dispatch_table) as _,
            broker: Arc::clone(&self.broker) as _,
            main_thread: Arc::clone(&self.main_thread),
            installer: Arc::clone(&self.installer) as _,
            delivery: Arc::clone(&self.delivery) as _,
            log: Arc::clone(&self.log) as _,
        }
    }

    /// Wire a proxy over the fakes
    pub fn proxy(&self) -> Result<OwnerProxy> {
        OwnerProxy::new(self.handles(), self.host.clone(), &self.config)
    }
}
