//! Delegation broker fake

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ownerkit_core::effects::{BrokerEffects, PermissionListener, ServiceConnection};
use ownerkit_core::{ComponentName, Parcel, ProxyError, RemoteBinder, Result};
use parking_lot::Mutex;

/// Admin component the fake broker reports
pub fn broker_owner() -> ComponentName {
    ComponentName::new("com.rosan.dhizuku", "com.rosan.dhizuku.server.DhizukuDAReceiver")
}

/// Wrapped handle: forwards every transaction to `inner`, recording that it
/// travelled under the broker's identity
pub struct BrokerWrapped {
    inner: Arc<dyn RemoteBinder>,
    forwarded: Arc<Mutex<Vec<u32>>>,
    failing: Arc<AtomicBool>,
}

impl RemoteBinder for BrokerWrapped {
    fn transact(&self, code: u32, data: Parcel, flags: u32) -> Result<Parcel> {
        self.forwarded.lock().push(code);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProxyError::transaction("broker binder died"));
        }
        self.inner.transact(code, data, flags)
    }
}

struct BrokerState {
    init_result: Result<bool>,
    granted: bool,
    pending: Vec<PermissionListener>,
    wrap_failure: Option<ProxyError>,
    bind_accepted: bool,
    connections: Vec<Arc<dyn ServiceConnection>>,
    bound: Vec<ComponentName>,
}

/// Broker client library fake with scriptable answers
pub struct FakeBroker {
    state: Mutex<BrokerState>,
    owner: ComponentName,
    init_calls: AtomicUsize,
    wraps: AtomicUsize,
    forwarded: Arc<Mutex<Vec<u32>>>,
    failing_wrapped: Arc<AtomicBool>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBroker {
    /// Initializes successfully, permission not granted
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState {
                init_result: Ok(true),
                granted: false,
                pending: Vec::new(),
                wrap_failure: None,
                bind_accepted: true,
                connections: Vec::new(),
                bound: Vec::new(),
            }),
            owner: broker_owner(),
            init_calls: AtomicUsize::new(0),
            wraps: AtomicUsize::new(0),
            forwarded: Arc::new(Mutex::new(Vec::new())),
            failing_wrapped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Result of the next `init` calls
    pub fn set_init_result(&self, result: Result<bool>) {
        self.state.lock().init_result = result;
    }

    /// Whether the permission is held
    pub fn set_granted(&self, granted: bool) {
        self.state.lock().granted = granted;
    }

    /// Make `wrap_binder` fail
    pub fn fail_wrapping(&self, error: Option<ProxyError>) {
        self.state.lock().wrap_failure = error;
    }

    /// Make transactions through wrapped handles fail
    pub fn fail_wrapped_transactions(&self, failing: bool) {
        self.failing_wrapped.store(failing, Ordering::SeqCst);
    }

    /// Whether `bind_user_service` accepts the request
    pub fn set_bind_accepted(&self, accepted: bool) {
        self.state.lock().bind_accepted = accepted;
    }

    /// Number of `init` calls
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Number of handles wrapped
    pub fn wrap_count(&self) -> usize {
        self.wraps.load(Ordering::SeqCst)
    }

    /// Codes of every transaction sent through a wrapped handle
    pub fn forwarded_codes(&self) -> Vec<u32> {
        self.forwarded.lock().clone()
    }

    /// Permission requests awaiting an answer
    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Answer the oldest permission request with `grant_code`
    ///
    /// Returns `false` when nothing was pending.
    pub fn answer_permission(&self, grant_code: i32) -> bool {
        let listener = {
            let mut state = self.state.lock();
            if state.pending.is_empty() {
                return false;
            }
            state.granted = grant_code == ownerkit_core::effects::PERMISSION_GRANTED;
            state.pending.remove(0)
        };
        listener(grant_code);
        true
    }

    /// Components bound through `bind_user_service`
    pub fn bound_services(&self) -> Vec<ComponentName> {
        self.state.lock().bound.clone()
    }

    /// Deliver `binder` to every pending service connection
    pub fn connect_service(&self, binder: Arc<dyn RemoteBinder>) {
        let connections = self.state.lock().connections.clone();
        for connection in connections {
            connection.on_service_connected(Arc::clone(&binder));
        }
    }

    /// Report every service connection as lost
    pub fn disconnect_service(&self) {
        let connections = self.state.lock().connections.clone();
        for connection in connections {
            connection.on_service_disconnected();
        }
    }
}

impl BrokerEffects for FakeBroker {
    fn init(&self) -> Result<bool> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().init_result.clone()
    }

    fn is_permission_granted(&self) -> Result<bool> {
        Ok(self.state.lock().granted)
    }

    fn request_permission(&self, listener: PermissionListener) -> Result<()> {
        self.state.lock().pending.push(listener);
        Ok(())
    }

    fn wrap_binder(&self, binder: Arc<dyn RemoteBinder>) -> Result<Arc<dyn RemoteBinder>> {
        let state = self.state.lock();
        if let Some(err) = &state.wrap_failure {
            return Err(err.clone());
        }
        self.wraps.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(BrokerWrapped {
            inner: binder,
            forwarded: Arc::clone(&self.forwarded),
            failing: Arc::clone(&self.failing_wrapped),
        }))
    }

    fn owner_component(&self) -> Result<ComponentName> {
        Ok(self.owner.clone())
    }

    fn bind_user_service(
        &self,
        service: &ComponentName,
        connection: Arc<dyn ServiceConnection>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        state.bound.push(service.clone());
        if !state.bind_accepted {
            return Ok(false);
        }
        state.connections.push(connection);
        Ok(true)
    }
}
