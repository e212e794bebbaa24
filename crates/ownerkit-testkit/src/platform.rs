//! Platform fakes: device policy, packages, services, stub dispatch tables

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ownerkit_core::effects::{
    DevicePolicyEffects, DispatchTableEffects, PackageQueryEffects, ServiceRegistryEffects,
};
use ownerkit_core::{
    ComponentName, ExceptionKind, GrantState, InterfaceFamily, OpcodeResolver, OperationSpec,
    Parcel, ProxyError, RemoteBinder, RemoteException, ReplyValue, Result, WireCodec, WireValue,
};
use parking_lot::Mutex;

use crate::binder::{arg_i32, arg_str, StubDispatcher};

#[derive(Default)]
struct PolicyState {
    owner: Option<String>,
    hidden: HashMap<String, bool>,
    grants: HashMap<(String, String), GrantState>,
    active_admins: HashSet<ComponentName>,
    failure: Option<ProxyError>,
    calls: Vec<String>,
}

/// Device policy API backed by maps
#[derive(Default)]
pub struct FakeDevicePolicy {
    state: Mutex<PolicyState>,
}

impl FakeDevicePolicy {
    /// No owner, nothing hidden
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `package` the device owner
    pub fn set_device_owner(&self, package: Option<&str>) {
        self.state.lock().owner = package.map(str::to_string);
    }

    /// Mark `admin` active
    pub fn activate_admin(&self, admin: &ComponentName) {
        self.state.lock().active_admins.insert(admin.clone());
    }

    /// Fail every call after the owner check with `error`
    pub fn fail_with(&self, error: Option<ProxyError>) {
        self.state.lock().failure = error;
    }

    /// Hidden flag recorded for `package`
    pub fn hidden(&self, package: &str) -> Option<bool> {
        self.state.lock().hidden.get(package).copied()
    }

    /// Grant state recorded for `package` / `permission`
    pub fn grant(&self, package: &str, permission: &str) -> Option<GrantState> {
        self.state
            .lock()
            .grants
            .get(&(package.to_string(), permission.to_string()))
            .copied()
    }

    /// Names of the calls made, owner checks excluded
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn enter(&self, call: &str) -> Result<parking_lot::MutexGuard<'_, PolicyState>> {
        let mut state = self.state.lock();
        state.calls.push(call.to_string());
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }
        Ok(state)
    }
}

impl DevicePolicyEffects for FakeDevicePolicy {
    fn is_device_owner_app(&self, package: &str) -> Result<bool> {
        Ok(self.state.lock().owner.as_deref() == Some(package))
    }

    fn set_application_hidden(
        &self,
        _admin: &ComponentName,
        package: &str,
        hidden: bool,
    ) -> Result<bool> {
        let mut state = self.enter("setApplicationHidden")?;
        state.hidden.insert(package.to_string(), hidden);
        Ok(true)
    }

    fn is_application_hidden(&self, _admin: &ComponentName, package: &str) -> Result<bool> {
        let state = self.enter("isApplicationHidden")?;
        Ok(state.hidden.get(package).copied().unwrap_or(false))
    }

    fn get_permission_grant_state(
        &self,
        _admin: &ComponentName,
        package: &str,
        permission: &str,
    ) -> Result<GrantState> {
        let state = self.enter("getPermissionGrantState")?;
        Ok(state
            .grants
            .get(&(package.to_string(), permission.to_string()))
            .copied()
            .unwrap_or_default())
    }

    fn set_permission_grant_state(
        &self,
        _admin: &ComponentName,
        package: &str,
        permission: &str,
        grant: GrantState,
    ) -> Result<bool> {
        let mut state = self.enter("setPermissionGrantState")?;
        state
            .grants
            .insert((package.to_string(), permission.to_string()), grant);
        Ok(true)
    }

    fn clear_device_owner_app(&self, package: &str) -> Result<()> {
        let mut state = self.enter("clearDeviceOwnerApp")?;
        if state.owner.as_deref() == Some(package) {
            state.owner = None;
        }
        Ok(())
    }

    fn is_admin_active(&self, admin: &ComponentName) -> Result<bool> {
        let state = self.enter("isAdminActive")?;
        Ok(state.active_admins.contains(admin))
    }

    fn remove_active_admin(&self, admin: &ComponentName) -> Result<()> {
        let mut state = self.enter("removeActiveAdmin")?;
        state.active_admins.remove(admin);
        Ok(())
    }
}

/// Installed-package set
#[derive(Default)]
pub struct FakePackages {
    installed: Mutex<HashSet<String>>,
    queries: Mutex<usize>,
}

impl FakePackages {
    /// Nothing installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or remove `package`
    pub fn set_installed(&self, package: &str, installed: bool) {
        let mut set = self.installed.lock();
        if installed {
            set.insert(package.to_string());
        } else {
            set.remove(package);
        }
    }

    /// Number of installed-package queries answered
    pub fn queries(&self) -> usize {
        *self.queries.lock()
    }
}

impl PackageQueryEffects for FakePackages {
    fn is_package_installed(&self, package: &str) -> bool {
        *self.queries.lock() += 1;
        self.installed.lock().contains(package)
    }
}

/// Service registry with settable entries
#[derive(Default)]
pub struct FakeServiceRegistry {
    services: Mutex<HashMap<String, Arc<dyn RemoteBinder>>>,
    package_installer: Mutex<Option<Arc<dyn RemoteBinder>>>,
    lookups: Mutex<Vec<String>>,
}

impl FakeServiceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `binder` under `name`
    pub fn register(&self, name: &str, binder: Arc<dyn RemoteBinder>) {
        self.services.lock().insert(name.to_string(), binder);
    }

    /// Set the package installer handle
    pub fn set_package_installer(&self, binder: Option<Arc<dyn RemoteBinder>>) {
        *self.package_installer.lock() = binder;
    }

    /// Service names looked up so far
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

impl ServiceRegistryEffects for FakeServiceRegistry {
    fn get_service(&self, name: &str) -> Option<Arc<dyn RemoteBinder>> {
        self.lookups.lock().push(name.to_string());
        self.services.lock().get(name).cloned()
    }

    fn package_installer(&self) -> Option<Arc<dyn RemoteBinder>> {
        self.package_installer.lock().clone()
    }
}

/// Generated stub constants, keyed by stub class and field name
#[derive(Default)]
pub struct FakeDispatchTable {
    fields: Mutex<HashMap<(String, String), u32>>,
}

impl FakeDispatchTable {
    /// No stub classes present
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `TRANSACTION_<operation>` for `spec` with value `code`
    pub fn expose(&self, spec: &OperationSpec, code: u32) {
        let Some(stub) = spec.family.stub_class() else {
            return;
        };
        self.fields
            .lock()
            .insert((stub, spec.transaction_field()), code);
    }
}

impl DispatchTableEffects for FakeDispatchTable {
    fn transaction_code(&self, stub_class: &str, field: &str) -> Option<u32> {
        self.fields
            .lock()
            .get(&(stub_class.to_string(), field.to_string()))
            .copied()
    }
}

/// A delegated device policy call as seen by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCall {
    /// Operation name
    pub operation: String,
    /// Admin component sent by the caller
    pub admin: Option<ComponentName>,
    /// Caller package sent by the caller
    pub caller_package: Option<String>,
    /// Target package
    pub package: Option<String>,
}

/// Device policy service stub over a [`FakeDevicePolicy`]
pub struct RemoteDevicePolicy {
    policy: Arc<FakeDevicePolicy>,
    stub: StubDispatcher,
    calls: Mutex<Vec<PolicyCall>>,
}

impl RemoteDevicePolicy {
    /// Stub decoding with the caller's opcode resolution
    pub fn new(
        policy: Arc<FakeDevicePolicy>,
        opcodes: Arc<OpcodeResolver>,
        codec: WireCodec,
    ) -> Arc<Self> {
        Arc::new(Self {
            policy,
            stub: StubDispatcher::new(InterfaceFamily::DevicePolicy, opcodes, codec),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Calls decoded so far
    pub fn calls(&self) -> Vec<PolicyCall> {
        self.calls.lock().clone()
    }

    fn handle(
        &self,
        spec: &OperationSpec,
        args: Vec<WireValue>,
    ) -> std::result::Result<ReplyValue, RemoteException> {
        let admin = match args.first() {
            Some(WireValue::Component(admin)) => admin.clone(),
            _ => None,
        };
        let caller_package = arg_str(&args, 1).ok();
        let package = arg_str(&args, 2)?;
        self.calls.lock().push(PolicyCall {
            operation: spec.name.to_string(),
            admin: admin.clone(),
            caller_package,
            package: Some(package.clone()),
        });
        let admin = admin.ok_or_else(|| {
            RemoteException::new(ExceptionKind::NullPointer, "admin component is null")
        })?;

        let result = match spec.name {
            "setApplicationHidden" => {
                let hidden = matches!(args.get(3), Some(WireValue::Bool(true)));
                self.policy
                    .set_application_hidden(&admin, &package, hidden)
                    .map(ReplyValue::Bool)
            }
            "isApplicationHidden" => self
                .policy
                .is_application_hidden(&admin, &package)
                .map(ReplyValue::Bool),
            "getPermissionGrantState" => {
                let permission = arg_str(&args, 3)?;
                self.policy
                    .get_permission_grant_state(&admin, &package, &permission)
                    .map(|state| ReplyValue::I32(state.code()))
            }
            _ => {
                let permission = arg_str(&args, 3)?;
                let state = GrantState::from_code(arg_i32(&args, 4)?).ok_or_else(|| {
                    RemoteException::new(ExceptionKind::IllegalArgument, "bad grant state")
                })?;
                self.policy
                    .set_permission_grant_state(&admin, &package, &permission, state)
                    .map(ReplyValue::Bool)
            }
        };
        result.map_err(|err| match err {
            ProxyError::Remote(exception) => exception,
            other => RemoteException::new(ExceptionKind::IllegalState, other.to_string()),
        })
    }
}

impl RemoteBinder for RemoteDevicePolicy {
    fn transact(&self, code: u32, data: Parcel, _flags: u32) -> Result<Parcel> {
        self.stub.serve(code, data, |spec, args| self.handle(spec, args))
    }
}
