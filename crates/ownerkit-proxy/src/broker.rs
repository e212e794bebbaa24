//! Delegation broker connector
//!
//! Owns the only cached state in the proxy: the broker initialization flag
//! and the handle of the broker-hosted install service. Both live behind
//! locks owned by the connector.

use std::sync::Arc;

use ownerkit_core::effects::{
    BrokerEffects, FailureLog, MainThreadEffects, PackageQueryEffects, RemoteBinder,
    ServiceConnection, PERMISSION_GRANTED,
};
use ownerkit_core::{ComponentName, ProxyError, Result};
use parking_lot::Mutex;

const TAG: &str = "BrokerConnector";

type ResultCallback = Box<dyn FnOnce(bool) + Send>;

#[derive(Default)]
struct BrokerState {
    initialized: Mutex<Option<bool>>,
    install_service: Mutex<Option<Arc<dyn RemoteBinder>>>,
}

impl BrokerState {
    fn invalidate(&self) {
        *self.initialized.lock() = None;
    }
}

/// Observer for the broker-hosted install service binding
pub trait InstallServiceListener: Send + Sync {
    /// The service handle is available
    fn connected(&self, _service: Arc<dyn RemoteBinder>) {}
    /// The service went away; the cached handle has been cleared
    fn disconnected(&self) {}
    /// Binding could not be started
    fn binding_failed(&self, _error: &ProxyError) {}
}

struct InstallServiceConnection {
    state: Arc<BrokerState>,
    listener: Arc<dyn InstallServiceListener>,
}

impl ServiceConnection for InstallServiceConnection {
    fn on_service_connected(&self, binder: Arc<dyn RemoteBinder>) {
        *self.state.install_service.lock() = Some(Arc::clone(&binder));
        tracing::info!("broker install service connected");
        self.listener.connected(binder);
    }

    fn on_service_disconnected(&self) {
        self.state.install_service.lock().take();
        tracing::info!("broker install service disconnected");
        self.listener.disconnected();
    }
}

/// Connection to the third-party delegation broker
pub struct DelegatedBrokerConnector {
    broker: Arc<dyn BrokerEffects>,
    packages: Arc<dyn PackageQueryEffects>,
    main_thread: Arc<dyn MainThreadEffects>,
    log: Arc<dyn FailureLog>,
    broker_package: String,
    state: Arc<BrokerState>,
}

impl DelegatedBrokerConnector {
    /// Create a connector for the broker installed as `broker_package`
    pub fn new(
        broker: Arc<dyn BrokerEffects>,
        packages: Arc<dyn PackageQueryEffects>,
        main_thread: Arc<dyn MainThreadEffects>,
        log: Arc<dyn FailureLog>,
        broker_package: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            packages,
            main_thread,
            log,
            broker_package: broker_package.into(),
            state: Arc::new(BrokerState::default()),
        }
    }

    /// Package name of the broker
    pub fn broker_package(&self) -> &str {
        &self.broker_package
    }

    /// Whether the broker application is installed
    pub fn is_broker_installed(&self) -> bool {
        self.packages.is_package_installed(&self.broker_package)
    }

    /// Initialize the broker client library once
    ///
    /// A successful initialization is cached until the next authorization
    /// request completes; a failed one is retried on the next call.
    pub fn ensure_initialized(&self) -> bool {
        if !self.is_broker_installed() {
            return false;
        }
        let mut initialized = self.state.initialized.lock();
        if *initialized == Some(true) {
            return true;
        }
        let ok = match self.broker.init() {
            Ok(ok) => ok,
            Err(err) => {
                self.log
                    .record(TAG, &format!("Broker initialization failed: {err}"));
                false
            }
        };
        *initialized = Some(ok);
        tracing::debug!(initialized = ok, "broker initialization");
        ok
    }

    /// Cached initialization flag, `None` when not yet computed
    pub fn cached_initialization(&self) -> Option<bool> {
        *self.state.initialized.lock()
    }

    /// Forget the cached initialization flag
    pub fn invalidate(&self) {
        self.state.invalidate();
    }

    /// Whether this package holds the broker permission
    pub fn is_permission_granted(&self) -> bool {
        match self.broker.is_permission_granted() {
            Ok(granted) => granted,
            Err(err) => {
                self.log
                    .record(TAG, &format!("Broker permission check failed: {err}"));
                false
            }
        }
    }

    /// Installed, initialized and permitted
    ///
    /// The installed check happens inside [`Self::ensure_initialized`].
    pub fn is_authorized(&self) -> bool {
        self.ensure_initialized() && self.is_permission_granted()
    }

    /// Ask the broker for permission
    ///
    /// `on_result` runs exactly once, on the UI-owning thread. The cached
    /// initialization flag is cleared as soon as the broker answers.
    pub fn request_authorization<F>(&self, on_result: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let callback: ResultCallback = Box::new(on_result);
        let slot = Arc::new(Mutex::new(Some(callback)));

        if !self.ensure_initialized() {
            self.log
                .record(TAG, "Broker not initialized, cannot request permission");
            post_result(self.main_thread.as_ref(), &slot, false);
            return;
        }

        let listener = {
            let state = Arc::clone(&self.state);
            let main_thread = Arc::clone(&self.main_thread);
            let slot = Arc::clone(&slot);
            Box::new(move |grant_code: i32| {
                state.invalidate();
                let granted = grant_code == PERMISSION_GRANTED;
                tracing::info!(granted, "broker permission result");
                post_result(main_thread.as_ref(), &slot, granted);
            })
        };

        if let Err(err) = self.broker.request_permission(listener) {
            self.log
                .record(TAG, &format!("Broker permission request failed: {err}"));
            post_result(self.main_thread.as_ref(), &slot, false);
        }
    }

    /// Wrap `handle` so its transactions carry the broker's identity
    pub fn wrap(&self, handle: Arc<dyn RemoteBinder>) -> Result<Arc<dyn RemoteBinder>> {
        self.broker.wrap_binder(handle)
    }

    /// The broker's device admin component
    pub fn owner_component(&self) -> Result<ComponentName> {
        self.broker.owner_component()
    }

    /// Bind the broker-hosted install service
    ///
    /// An already bound handle is reported immediately. The handle is cached
    /// on connect and cleared on disconnect.
    pub fn bind_install_service(
        &self,
        service: &ComponentName,
        listener: Arc<dyn InstallServiceListener>,
    ) {
        if let Some(bound) = self.install_service() {
            listener.connected(bound);
            return;
        }
        if !self.is_authorized() {
            let err = ProxyError::AuthorityUnavailable;
            self.log
                .record(TAG, &format!("Cannot bind install service: {err}"));
            listener.binding_failed(&err);
            return;
        }

        let connection = Arc::new(InstallServiceConnection {
            state: Arc::clone(&self.state),
            listener: Arc::clone(&listener),
        });
        let outcome = match self.broker.bind_user_service(service, connection) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ProxyError::broker(format!("bindUserService({service}) refused"))),
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            self.log
                .record(TAG, &format!("Install service binding failed: {err}"));
            listener.binding_failed(&err);
        }
    }

    /// Currently bound install service handle
    pub fn install_service(&self) -> Option<Arc<dyn RemoteBinder>> {
        self.state.install_service.lock().clone()
    }

    /// Remove and return the bound install service handle
    pub fn take_install_service(&self) -> Option<Arc<dyn RemoteBinder>> {
        self.state.install_service.lock().take()
    }
}

fn post_result(
    main_thread: &dyn MainThreadEffects,
    slot: &Arc<Mutex<Option<ResultCallback>>>,
    granted: bool,
) {
    if let Some(callback) = slot.lock().take() {
        main_thread.post(Box::new(move || callback(granted)));
    }
}
