//! Effect interfaces for the platform collaborators
//!
//! Every out-of-process or platform-owned capability the proxy touches is an
//! effect trait here. Production handlers bridge to the platform; the testkit
//! provides fakes. All effects are blocking: callers offload them from the
//! UI-owning thread.
//!
//! # Effect Classification
//!
//! - **Remote surfaces**: [`RemoteBinder`], [`ServiceRegistryEffects`],
//!   [`DispatchTableEffects`]
//! - **Platform APIs**: [`DevicePolicyEffects`], [`PackageQueryEffects`],
//!   [`LocalInstallerEffects`], [`ResultDeliveryEffects`]
//! - **Delegation broker**: [`BrokerEffects`], [`ServiceConnection`]
//! - **Ambient**: [`MainThreadEffects`], [`FailureLog`]

use std::io::Write;
use std::sync::Arc;

use crate::errors::Result;
use crate::parcel::Parcel;
use crate::types::{ComponentName, GrantState, SessionParams};

/// Transaction flag: fire and forget
pub const FLAG_ONEWAY: u32 = 0x01;

/// Out-of-process callable surface (a binder handle)
pub trait RemoteBinder: Send + Sync {
    /// Perform a transaction and return the reply parcel
    ///
    /// `Err` means the transaction itself failed. Exceptions raised by the
    /// remote method travel inside the reply.
    fn transact(&self, code: u32, data: Parcel, flags: u32) -> Result<Parcel>;
}

/// Device policy APIs available to the device owner itself
pub trait DevicePolicyEffects: Send + Sync {
    /// Whether `package` is the device owner
    fn is_device_owner_app(&self, package: &str) -> Result<bool>;

    /// Hide or unhide a package
    fn set_application_hidden(
        &self,
        admin: &ComponentName,
        package: &str,
        hidden: bool,
    ) -> Result<bool>;

    /// Whether a package is hidden
    fn is_application_hidden(&self, admin: &ComponentName, package: &str) -> Result<bool>;

    /// Grant policy of a runtime permission
    fn get_permission_grant_state(
        &self,
        admin: &ComponentName,
        package: &str,
        permission: &str,
    ) -> Result<GrantState>;

    /// Set the grant policy of a runtime permission
    fn set_permission_grant_state(
        &self,
        admin: &ComponentName,
        package: &str,
        permission: &str,
        state: GrantState,
    ) -> Result<bool>;

    /// Relinquish device ownership
    fn clear_device_owner_app(&self, package: &str) -> Result<()>;

    /// Whether the admin receiver is active
    fn is_admin_active(&self, admin: &ComponentName) -> Result<bool>;

    /// Deactivate the admin receiver
    fn remove_active_admin(&self, admin: &ComponentName) -> Result<()>;
}

/// Package manager queries
pub trait PackageQueryEffects: Send + Sync {
    /// Whether `package` is installed for the current user
    fn is_package_installed(&self, package: &str) -> bool;
}

/// System service lookup
pub trait ServiceRegistryEffects: Send + Sync {
    /// Look up a system service by its service-manager name
    fn get_service(&self, name: &str) -> Option<Arc<dyn RemoteBinder>>;

    /// The package installer handle owned by the package manager
    fn package_installer(&self) -> Option<Arc<dyn RemoteBinder>>;
}

/// Introspection of generated dispatch tables
pub trait DispatchTableEffects: Send + Sync {
    /// Read the integer constant `field` of the stub class, if it exists
    fn transaction_code(&self, stub_class: &str, field: &str) -> Option<u32>;
}

/// Listener for the broker's permission dialog; receives the grant code
pub type PermissionListener = Box<dyn FnOnce(i32) + Send>;

/// Grant code meaning the broker permission was granted
pub const PERMISSION_GRANTED: i32 = 0;

/// The third-party delegation broker
pub trait BrokerEffects: Send + Sync {
    /// Initialize the broker client library
    fn init(&self) -> Result<bool>;

    /// Whether this package holds the broker permission
    fn is_permission_granted(&self) -> Result<bool>;

    /// Ask the broker for permission; the listener fires later on an
    /// arbitrary thread
    fn request_permission(&self, listener: PermissionListener) -> Result<()>;

    /// Wrap a handle so transactions run with the broker's identity
    fn wrap_binder(&self, binder: Arc<dyn RemoteBinder>) -> Result<Arc<dyn RemoteBinder>>;

    /// The broker's own device admin component
    fn owner_component(&self) -> Result<ComponentName>;

    /// Bind a service hosted inside the broker process
    fn bind_user_service(
        &self,
        service: &ComponentName,
        connection: Arc<dyn ServiceConnection>,
    ) -> Result<bool>;
}

/// Callbacks for a bound broker-hosted service
pub trait ServiceConnection: Send + Sync {
    /// The service is up
    fn on_service_connected(&self, binder: Arc<dyn RemoteBinder>);
    /// The service went away
    fn on_service_disconnected(&self);
}

/// Work posted to the UI-owning thread
pub type MainThreadTask = Box<dyn FnOnce() + Send>;

/// Re-dispatch onto the UI-owning thread
pub trait MainThreadEffects: Send + Sync {
    /// Queue `task` to run on the UI-owning thread
    fn post(&self, task: MainThreadTask);
}

/// The platform's standard package installer, used in-process
pub trait LocalInstallerEffects: Send + Sync {
    /// Create a session and return its id
    fn create_session(&self, params: &SessionParams) -> Result<i32>;

    /// Open a sink for one named entry
    fn open_write(
        &self,
        session_id: i32,
        name: &str,
        offset: i64,
        length: i64,
    ) -> Result<Box<dyn Write + Send>>;

    /// Ensure the bytes written to `name` are durable
    fn fsync(&self, session_id: i32, name: &str) -> Result<()>;

    /// Submit the session; the outcome goes to `status_target`
    fn commit(&self, session_id: i32, status_target: &Arc<dyn RemoteBinder>) -> Result<()>;

    /// Discard the session
    fn abandon(&self, session_id: i32) -> Result<()>;

    /// The binder behind an open session, for delegated commits
    fn session_binder(&self, session_id: i32) -> Option<Arc<dyn RemoteBinder>>;
}

/// Pending-intent flag: replace extras of an existing intent
pub const FLAG_UPDATE_CURRENT: i32 = 0x0800_0000;
/// Pending-intent flag: allow the installer to fill in extras (API 31+)
pub const FLAG_MUTABLE: i32 = 0x0200_0000;

/// Install-result delivery
pub trait ResultDeliveryEffects: Send + Sync {
    /// Produce the status receiver (an intent sender) for `session_id`
    fn status_target(&self, session_id: i32, flags: i32) -> Result<Arc<dyn RemoteBinder>>;
}

/// Logging collaborator; reports every caught failure
pub trait FailureLog: Send + Sync {
    /// Record a failure under `tag`
    fn record(&self, tag: &str, message: &str);
}

/// Production failure log backed by `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureLog;

impl FailureLog for TracingFailureLog {
    fn record(&self, tag: &str, message: &str) {
        tracing::warn!(target: "ownerkit", tag, "{message}");
    }
}
