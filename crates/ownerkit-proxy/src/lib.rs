//! ownerkit Proxy - device-owner operations over direct or delegated authority
//!
//! Wires the core codec and opcode resolution to the platform effects:
//!
//! - [`AuthorityModeResolver`] picks the authority path from live state
//! - [`PrivilegedOperationClient`] runs device policy operations
//! - [`DelegatedBrokerConnector`] talks to the delegation broker
//! - [`InstallSessionBroker`] drives package install sessions
//!
//! [`OwnerProxy`] assembles all of them from a [`PlatformHandles`] bundle.

#![forbid(unsafe_code)]

/// Authority mode resolution
pub mod authority;

/// Delegation broker connector
pub mod broker;

/// Privileged operation client
pub mod client;

/// Install session orchestration
pub mod install;

/// Blocking offload and main-thread dispatch
pub mod tasks;

use std::sync::Arc;

use ownerkit_core::effects::{
    BrokerEffects, DevicePolicyEffects, DispatchTableEffects, FailureLog, LocalInstallerEffects,
    MainThreadEffects, PackageQueryEffects, ResultDeliveryEffects, ServiceRegistryEffects,
};
use ownerkit_core::{AuthorityMode, HostContext, OpcodeResolver, ProxyConfig, Result, WireCodec};

pub use authority::AuthorityModeResolver;
pub use broker::{DelegatedBrokerConnector, InstallServiceListener};
pub use client::PrivilegedOperationClient;
pub use install::{InstallReceipt, InstallSession, InstallSessionBroker};
pub use tasks::{offload, MainThreadHandle, MainThreadQueue};

/// Platform collaborators the proxy is built from
#[derive(Clone)]
pub struct PlatformHandles {
    /// In-process device policy API
    pub device_policy: Arc<dyn DevicePolicyEffects>,
    /// Installed package queries
    pub packages: Arc<dyn PackageQueryEffects>,
    /// System service registry
    pub services: Arc<dyn ServiceRegistryEffects>,
    /// Generated stub dispatch tables
    pub dispatch_table: Arc<dyn DispatchTableEffects>,
    /// Delegation broker client library
    pub broker: Arc<dyn BrokerEffects>,
    /// UI-owning thread
    pub main_thread: Arc<dyn MainThreadEffects>,
    /// Local package installer
    pub installer: Arc<dyn LocalInstallerEffects>,
    /// Install result delivery
    pub delivery: Arc<dyn ResultDeliveryEffects>,
    /// Failure log
    pub log: Arc<dyn FailureLog>,
}

/// Fully wired proxy for one host application
pub struct OwnerProxy {
    broker: Arc<DelegatedBrokerConnector>,
    resolver: Arc<AuthorityModeResolver>,
    client: PrivilegedOperationClient,
    installer: InstallSessionBroker,
    opcodes: Arc<OpcodeResolver>,
}

impl OwnerProxy {
    /// Validate `config` and wire every component
    pub fn new(handles: PlatformHandles, host: HostContext, config: &ProxyConfig) -> Result<Self> {
        config.validate()?;

        let codec = WireCodec::new(host.sdk_level);
        let opcodes = Arc::new(OpcodeResolver::standard(
            Arc::clone(&handles.dispatch_table),
            config.fallback_table(),
            host.sdk_level,
        ));
        let broker = Arc::new(DelegatedBrokerConnector::new(
            Arc::clone(&handles.broker),
            Arc::clone(&handles.packages),
            Arc::clone(&handles.main_thread),
            Arc::clone(&handles.log),
            config.broker_package.clone(),
        ));
        let resolver = Arc::new(AuthorityModeResolver::new(
            Arc::clone(&handles.device_policy),
            Arc::clone(&broker),
            host.package_name.clone(),
            Arc::clone(&handles.log),
        ));
        let client = PrivilegedOperationClient::new(
            Arc::clone(&resolver),
            Arc::clone(&broker),
            Arc::clone(&handles.device_policy),
            Arc::clone(&handles.services),
            Arc::clone(&opcodes),
            codec,
            host.admin_component.clone(),
            host.package_name.clone(),
            Arc::clone(&handles.log),
        );
        let installer = InstallSessionBroker::new(
            Arc::clone(&resolver),
            Arc::clone(&broker),
            handles.installer,
            handles.services,
            handles.delivery,
            Arc::clone(&opcodes),
            codec,
            handles.log,
            config,
        );

        tracing::info!(
            package = %host.package_name,
            sdk = host.sdk_level,
            broker = %config.broker_package,
            "owner proxy ready"
        );
        Ok(Self {
            broker,
            resolver,
            client,
            installer,
            opcodes,
        })
    }

    /// Device policy operations
    pub fn client(&self) -> &PrivilegedOperationClient {
        &self.client
    }

    /// Install sessions
    pub fn installer(&self) -> &InstallSessionBroker {
        &self.installer
    }

    /// Broker connection
    pub fn broker(&self) -> &Arc<DelegatedBrokerConnector> {
        &self.broker
    }

    /// Authority resolver
    pub fn resolver(&self) -> &Arc<AuthorityModeResolver> {
        &self.resolver
    }

    /// Dispatch code resolver
    pub fn opcodes(&self) -> &Arc<OpcodeResolver> {
        &self.opcodes
    }

    /// Current authority mode
    pub fn mode(&self) -> AuthorityMode {
        self.resolver.resolve()
    }

    /// Any authority path is usable
    pub fn is_available(&self) -> bool {
        self.resolver.is_available()
    }
}
