//! Authority mode resolution
//!
//! The mode is recomputed from live state on every call. Only the broker's
//! initialization flag is cached, inside the connector.

use std::sync::Arc;

use ownerkit_core::effects::{DevicePolicyEffects, FailureLog};
use ownerkit_core::AuthorityMode;

use crate::broker::DelegatedBrokerConnector;

const TAG: &str = "AuthorityResolver";

/// Decides which authority path privileged operations take
pub struct AuthorityModeResolver {
    device_policy: Arc<dyn DevicePolicyEffects>,
    broker: Arc<DelegatedBrokerConnector>,
    package_name: String,
    log: Arc<dyn FailureLog>,
}

impl AuthorityModeResolver {
    /// Create a resolver for the running `package_name`
    pub fn new(
        device_policy: Arc<dyn DevicePolicyEffects>,
        broker: Arc<DelegatedBrokerConnector>,
        package_name: impl Into<String>,
        log: Arc<dyn FailureLog>,
    ) -> Self {
        Self {
            device_policy,
            broker,
            package_name: package_name.into(),
            log,
        }
    }

    /// Direct if this package is device owner, else delegated if the broker
    /// is installed, initialized and permitted, else none
    pub fn resolve(&self) -> AuthorityMode {
        match self.device_policy.is_device_owner_app(&self.package_name) {
            Ok(true) => return AuthorityMode::Direct,
            Ok(false) => {}
            Err(err) => self
                .log
                .record(TAG, &format!("Device owner check failed: {err}")),
        }

        let mode = if self.broker.is_authorized() {
            AuthorityMode::Delegated
        } else {
            AuthorityMode::None
        };
        tracing::debug!(%mode, "resolved authority mode");
        mode
    }

    /// Any authority path is usable
    pub fn is_available(&self) -> bool {
        self.resolve().is_available()
    }
}
