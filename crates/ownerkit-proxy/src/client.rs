//! Privileged operation client
//!
//! Every operation comes in two forms. `try_*` returns the full
//! [`Result`]; the plain form logs the failure through the failure log and
//! collapses it to `false` or the default grant state.

use std::sync::Arc;

use ownerkit_core::effects::{DevicePolicyEffects, FailureLog, ServiceRegistryEffects};
use ownerkit_core::schema::device_policy;
use ownerkit_core::{
    AuthorityMode, ComponentName, GrantState, OpcodeResolver, OperationSpec, ProxyError,
    ReplyValue, Result, WireCodec, WireValue,
};

use crate::authority::AuthorityModeResolver;
use crate::broker::DelegatedBrokerConnector;

const TAG: &str = "PrivilegedClient";
const DEVICE_POLICY_SERVICE: &str = "device_policy";

/// Performs device-owner operations through the active authority path
pub struct PrivilegedOperationClient {
    resolver: Arc<AuthorityModeResolver>,
    broker: Arc<DelegatedBrokerConnector>,
    device_policy: Arc<dyn DevicePolicyEffects>,
    services: Arc<dyn ServiceRegistryEffects>,
    opcodes: Arc<OpcodeResolver>,
    codec: WireCodec,
    admin: ComponentName,
    package_name: String,
    log: Arc<dyn FailureLog>,
}

impl PrivilegedOperationClient {
    /// Create a client
    pub fn new(
        resolver: Arc<AuthorityModeResolver>,
        broker: Arc<DelegatedBrokerConnector>,
        device_policy: Arc<dyn DevicePolicyEffects>,
        services: Arc<dyn ServiceRegistryEffects>,
        opcodes: Arc<OpcodeResolver>,
        codec: WireCodec,
        admin: ComponentName,
        package_name: impl Into<String>,
        log: Arc<dyn FailureLog>,
    ) -> Self {
        Self {
            resolver,
            broker,
            device_policy,
            services,
            opcodes,
            codec,
            admin,
            package_name: package_name.into(),
            log,
        }
    }

    /// Current authority mode
    pub fn mode(&self) -> AuthorityMode {
        self.resolver.resolve()
    }

    /// Any authority path is usable
    pub fn is_available(&self) -> bool {
        self.resolver.is_available()
    }

    /// Hide or unhide `package`
    pub fn try_set_hidden(&self, package: &str, hidden: bool) -> Result<bool> {
        match self.resolver.resolve() {
            AuthorityMode::None => Err(ProxyError::AuthorityUnavailable),
            AuthorityMode::Direct => {
                self.device_policy
                    .set_application_hidden(&self.admin, package, hidden)
            }
            AuthorityMode::Delegated => self
                .call_delegated(&device_policy::SET_APPLICATION_HIDDEN, |owner| {
                    let mut args = target_args(owner, package);
                    args.push(WireValue::Bool(hidden));
                    args
                })?
                .into_bool(),
        }
    }

    /// Hide or unhide `package`; `false` on any failure
    pub fn set_hidden(&self, package: &str, hidden: bool) -> bool {
        let result = self.try_set_hidden(package, hidden);
        self.collapse("setApplicationHidden", result, false)
    }

    /// Whether `package` is hidden
    pub fn try_is_hidden(&self, package: &str) -> Result<bool> {
        match self.resolver.resolve() {
            AuthorityMode::None => Err(ProxyError::AuthorityUnavailable),
            AuthorityMode::Direct => self.device_policy.is_application_hidden(&self.admin, package),
            AuthorityMode::Delegated => self
                .call_delegated(&device_policy::IS_APPLICATION_HIDDEN, |owner| {
                    target_args(owner, package)
                })?
                .into_bool(),
        }
    }

    /// Whether `package` is hidden; `false` on any failure
    pub fn is_hidden(&self, package: &str) -> bool {
        let result = self.try_is_hidden(package);
        self.collapse("isApplicationHidden", result, false)
    }

    /// Grant policy of `permission` for `package`
    pub fn try_get_permission_grant_state(
        &self,
        package: &str,
        permission: &str,
    ) -> Result<GrantState> {
        match self.resolver.resolve() {
            AuthorityMode::None => Err(ProxyError::AuthorityUnavailable),
            AuthorityMode::Direct => {
                self.device_policy
                    .get_permission_grant_state(&self.admin, package, permission)
            }
            AuthorityMode::Delegated => {
                let code = self
                    .call_delegated(&device_policy::GET_PERMISSION_GRANT_STATE, |owner| {
                        let mut args = target_args(owner, package);
                        args.push(WireValue::str(permission));
                        args
                    })?
                    .into_i32()?;
                GrantState::from_code(code)
                    .ok_or_else(|| ProxyError::codec(format!("unknown grant state {code}")))
            }
        }
    }

    /// Grant policy of `permission` for `package`; default on any failure
    pub fn get_permission_grant_state(&self, package: &str, permission: &str) -> GrantState {
        let result = self.try_get_permission_grant_state(package, permission);
        self.collapse("getPermissionGrantState", result, GrantState::Default)
    }

    /// Set the grant policy of `permission` for `package`
    pub fn try_set_permission_grant_state(
        &self,
        package: &str,
        permission: &str,
        state: GrantState,
    ) -> Result<bool> {
        match self.resolver.resolve() {
            AuthorityMode::None => Err(ProxyError::AuthorityUnavailable),
            AuthorityMode::Direct => self.device_policy.set_permission_grant_state(
                &self.admin,
                package,
                permission,
                state,
            ),
            AuthorityMode::Delegated => self
                .call_delegated(&device_policy::SET_PERMISSION_GRANT_STATE, |owner| {
                    let mut args = target_args(owner, package);
                    args.push(WireValue::str(permission));
                    args.push(WireValue::I32(state.code()));
                    args
                })?
                .into_bool(),
        }
    }

    /// Set the grant policy; `false` on any failure
    pub fn set_permission_grant_state(
        &self,
        package: &str,
        permission: &str,
        state: GrantState,
    ) -> bool {
        let result = self.try_set_permission_grant_state(package, permission, state);
        self.collapse("setPermissionGrantState", result, false)
    }

    /// Relinquish device ownership
    ///
    /// Only native ownership can be cleared; in delegated mode the broker
    /// owns the device and nothing is attempted (`Ok(false)`).
    pub fn try_clear_authority(&self) -> Result<bool> {
        match self.resolver.resolve() {
            AuthorityMode::None => Err(ProxyError::AuthorityUnavailable),
            AuthorityMode::Direct => {
                self.device_policy
                    .clear_device_owner_app(&self.package_name)?;
                tracing::info!(package = %self.package_name, "device owner cleared");
                Ok(true)
            }
            AuthorityMode::Delegated => {
                tracing::debug!("device owner held by broker; not clearing");
                Ok(false)
            }
        }
    }

    /// Relinquish device ownership; `false` if nothing was cleared
    pub fn clear_authority(&self) -> bool {
        let result = self.try_clear_authority();
        self.collapse("clearDeviceOwnerApp", result, false)
    }

    /// Deactivate this package's admin receiver if it is active
    ///
    /// Uses the platform API directly whatever the mode; returns whether a
    /// receiver was removed.
    pub fn try_remove_active_delegation(&self) -> Result<bool> {
        if !self.device_policy.is_admin_active(&self.admin)? {
            return Ok(false);
        }
        self.device_policy.remove_active_admin(&self.admin)?;
        tracing::info!(admin = %self.admin, "active admin removed");
        Ok(true)
    }

    /// Deactivate the admin receiver; `false` on failure or when inactive
    pub fn remove_active_delegation(&self) -> bool {
        let result = self.try_remove_active_delegation();
        self.collapse("removeActiveAdmin", result, false)
    }

    fn call_delegated<F>(&self, spec: &OperationSpec, args: F) -> Result<ReplyValue>
    where
        F: FnOnce(&ComponentName) -> Vec<WireValue>,
    {
        let code = self.opcodes.resolve_spec(spec)?;
        let service = self
            .services
            .get_service(DEVICE_POLICY_SERVICE)
            .ok_or_else(|| ProxyError::handle_unavailable(DEVICE_POLICY_SERVICE))?;
        let remote = self.broker.wrap(service)?;
        let owner = self.broker.owner_component()?;
        let request = self.codec.encode_request(spec, args(&owner))?;

        tracing::debug!(operation = %spec, code, owner = %owner, "delegated transaction");
        let mut reply = remote.transact(code, request, 0)?;
        self.codec.decode_reply(spec, &mut reply)
    }

    fn collapse<T>(&self, operation: &str, result: Result<T>, fallback: T) -> T {
        match result {
            Ok(value) => value,
            Err(ProxyError::AuthorityUnavailable) => {
                tracing::debug!(operation, "no authority available");
                fallback
            }
            Err(err) => {
                self.log.record(TAG, &format!("{operation} failed: {err}"));
                fallback
            }
        }
    }
}

/// Leading arguments shared by every delegated device policy call: the
/// broker's admin component, the broker's package as caller and the target.
fn target_args(owner: &ComponentName, package: &str) -> Vec<WireValue> {
    vec![
        WireValue::Component(Some(owner.clone())),
        WireValue::str(owner.package.clone()),
        WireValue::str(package),
    ]
}
