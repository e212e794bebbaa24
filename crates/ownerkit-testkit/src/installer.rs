//! Package installer fakes
//!
//! One [`InstallerBackend`] holds every session. It is reachable through the
//! local installer API ([`FakeInstaller`]), as a remote package installer and
//! session pair ([`RemotePackageInstaller`]) and as the broker-hosted install
//! service ([`FakeInstallService`]), so tests can assert on the same
//! sessions whatever route the proxy took.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

use ownerkit_core::effects::{LocalInstallerEffects, ResultDeliveryEffects};
use ownerkit_core::schema::{install_service, installer_session, package_installer};
use ownerkit_core::{
    ExceptionKind, InterfaceFamily, OpcodeResolver, Parcel, ParcelFd, ProxyError, RemoteBinder,
    RemoteException, ReplyValue, Result, SessionParams, WireCodec, WireValue,
};
use parking_lot::Mutex;

use crate::binder::{arg_i32, arg_str, ScriptedBinder, StubDispatcher};

/// Which surface committed or abandoned a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Local installer API
    Local,
    /// Remote package installer or session handle
    Remote,
    /// Broker-hosted install service
    Service,
}

/// Observable state of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    /// Parameters the session was created with
    pub params: Option<SessionParams>,
    /// Entry name to bytes received
    pub entries: BTreeMap<String, Vec<u8>>,
    /// Entries synced
    pub synced: Vec<String>,
    /// Commits accepted, by surface
    pub commits: Vec<Surface>,
    /// Abandons received, by surface
    pub abandons: Vec<Surface>,
}

#[derive(Default)]
struct BackendState {
    next_id: i32,
    sessions: BTreeMap<i32, SessionRecord>,
    fail_create: bool,
    fail_write_after: Option<usize>,
    fail_local_commit: bool,
    fail_remote_commit: bool,
    destroyed: bool,
}

/// Shared session store behind every installer surface
#[derive(Default)]
pub struct InstallerBackend {
    state: Mutex<BackendState>,
}

impl InstallerBackend {
    /// Empty store; ids start at 1
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make session creation fail
    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    /// Fail each entry write once `bytes` bytes of it have been accepted
    pub fn fail_write_after(&self, bytes: Option<usize>) {
        self.state.lock().fail_write_after = bytes;
    }

    /// Make commits through the local installer API fail
    pub fn fail_local_commit(&self, fail: bool) {
        self.state.lock().fail_local_commit = fail;
    }

    /// Make commits through remote session handles fail
    pub fn fail_remote_commit(&self, fail: bool) {
        self.state.lock().fail_remote_commit = fail;
    }

    /// Snapshot of session `id`
    pub fn session(&self, id: i32) -> Option<SessionRecord> {
        self.state.lock().sessions.get(&id).cloned()
    }

    /// Ids of every session created
    pub fn session_ids(&self) -> Vec<i32> {
        self.state.lock().sessions.keys().copied().collect()
    }

    /// Whether the install service was told to destroy itself
    pub fn destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    fn create(&self, params: Option<SessionParams>) -> Result<i32> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(ProxyError::io("session creation refused"));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.sessions.insert(
            id,
            SessionRecord {
                params,
                ..SessionRecord::default()
            },
        );
        Ok(id)
    }

    fn with_session<T>(&self, id: i32, f: impl FnOnce(&mut SessionRecord) -> T) -> Result<T> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| ProxyError::io(format!("no session {id}")))?;
        Ok(f(session))
    }

    fn open_sink(self: &Arc<Self>, id: i32, name: &str) -> Result<EntrySink> {
        let limit = self.state.lock().fail_write_after;
        self.with_session(id, |session| {
            session.entries.insert(name.to_string(), Vec::new());
        })?;
        Ok(EntrySink {
            backend: Arc::clone(self),
            id,
            name: name.to_string(),
            remaining: limit,
        })
    }

    fn sync(&self, id: i32, name: &str) -> Result<()> {
        self.with_session(id, |session| session.synced.push(name.to_string()))
    }

    fn commit(&self, id: i32, surface: Surface) -> Result<()> {
        let failing = {
            let state = self.state.lock();
            match surface {
                Surface::Local => state.fail_local_commit,
                Surface::Remote => state.fail_remote_commit,
                Surface::Service => false,
            }
        };
        if failing {
            return Err(ProxyError::transaction(format!("{surface:?} commit refused")));
        }
        self.with_session(id, |session| session.commits.push(surface))
    }

    fn abandon(&self, id: i32, surface: Surface) -> Result<()> {
        self.with_session(id, |session| session.abandons.push(surface))
    }
}

/// Write end of one session entry
pub struct EntrySink {
    backend: Arc<InstallerBackend>,
    id: i32,
    name: String,
    remaining: Option<usize>,
}

impl Write for EntrySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let take = match self.remaining {
            Some(0) => return Err(io::Error::new(io::ErrorKind::Other, "No space left on device")),
            Some(left) => buf.len().min(left),
            None => buf.len(),
        };
        if let Some(left) = self.remaining.as_mut() {
            *left -= take;
        }
        let name = self.name.clone();
        self.backend
            .with_session(self.id, |session| {
                session
                    .entries
                    .entry(name)
                    .or_default()
                    .extend_from_slice(&buf[..take]);
            })
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e.to_string()))?;
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Local installer API over the backend
pub struct FakeInstaller {
    backend: Arc<InstallerBackend>,
    remote: Arc<RemotePackageInstaller>,
}

impl FakeInstaller {
    /// Local API whose session handles are served by `remote`
    pub fn new(backend: Arc<InstallerBackend>, remote: Arc<RemotePackageInstaller>) -> Self {
        Self { backend, remote }
    }
}

impl LocalInstallerEffects for FakeInstaller {
    fn create_session(&self, params: &SessionParams) -> Result<i32> {
        self.backend.create(Some(params.clone()))
    }

    fn open_write(
        &self,
        session_id: i32,
        name: &str,
        _offset: i64,
        _length: i64,
    ) -> Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.backend.open_sink(session_id, name)?))
    }

    fn fsync(&self, session_id: i32, name: &str) -> Result<()> {
        self.backend.sync(session_id, name)
    }

    fn commit(&self, session_id: i32, _status_target: &Arc<dyn RemoteBinder>) -> Result<()> {
        self.backend.commit(session_id, Surface::Local)
    }

    fn abandon(&self, session_id: i32) -> Result<()> {
        self.backend.abandon(session_id, Surface::Local)
    }

    fn session_binder(&self, session_id: i32) -> Option<Arc<dyn RemoteBinder>> {
        self.backend.session(session_id)?;
        Some(self.remote.session_handle(session_id))
    }
}

fn remote_error(err: ProxyError) -> RemoteException {
    RemoteException::new(ExceptionKind::IllegalState, err.to_string())
}

/// Remote package installer stub over the backend
pub struct RemotePackageInstaller {
    backend: Arc<InstallerBackend>,
    opcodes: Arc<OpcodeResolver>,
    codec: WireCodec,
    stub: StubDispatcher,
}

impl RemotePackageInstaller {
    /// Stub decoding with the caller's opcode resolution
    pub fn new(
        backend: Arc<InstallerBackend>,
        opcodes: Arc<OpcodeResolver>,
        codec: WireCodec,
    ) -> Arc<Self> {
        let stub = StubDispatcher::new(
            InterfaceFamily::PackageInstaller,
            Arc::clone(&opcodes),
            codec,
        );
        Arc::new(Self {
            backend,
            opcodes,
            codec,
            stub,
        })
    }

    /// Session stub for `session_id`
    pub fn session_handle(&self, session_id: i32) -> Arc<dyn RemoteBinder> {
        Arc::new(RemoteSession {
            backend: Arc::clone(&self.backend),
            id: session_id,
            stub: StubDispatcher::new(
                InterfaceFamily::InstallerSession,
                Arc::clone(&self.opcodes),
                self.codec,
            ),
        })
    }
}

impl RemoteBinder for RemotePackageInstaller {
    fn transact(&self, code: u32, data: Parcel, _flags: u32) -> Result<Parcel> {
        self.stub.serve(code, data, |spec, args| {
            if spec.name == package_installer::CREATE_SESSION.name {
                let params = match args.first() {
                    Some(WireValue::SessionParams(params)) => params.clone(),
                    _ => None,
                };
                self.backend.create(params).map(ReplyValue::I32).map_err(remote_error)
            } else if spec.name == package_installer::OPEN_SESSION.name {
                let id = arg_i32(&args, 0)?;
                self.backend.session(id).ok_or_else(|| {
                    RemoteException::new(ExceptionKind::Security, format!("no session {id}"))
                })?;
                Ok(ReplyValue::Binder(Some(self.session_handle(id))))
            } else {
                let id = arg_i32(&args, 0)?;
                self.backend
                    .abandon(id, Surface::Remote)
                    .map(|()| ReplyValue::Void)
                    .map_err(remote_error)
            }
        })
    }
}

struct RemoteSession {
    backend: Arc<InstallerBackend>,
    id: i32,
    stub: StubDispatcher,
}

impl RemoteBinder for RemoteSession {
    fn transact(&self, code: u32, data: Parcel, _flags: u32) -> Result<Parcel> {
        self.stub.serve(code, data, |spec, args| {
            if spec.name == installer_session::OPEN_WRITE.name {
                let name = arg_str(&args, 0)?;
                let sink = self.backend.open_sink(self.id, &name).map_err(remote_error)?;
                Ok(ReplyValue::Fd(Some(ParcelFd::Writer(Box::new(sink)))))
            } else if spec.name == installer_session::FSYNC.name {
                let name = arg_str(&args, 0)?;
                self.backend
                    .sync(self.id, &name)
                    .map(|()| ReplyValue::Void)
                    .map_err(remote_error)
            } else {
                self.backend
                    .commit(self.id, Surface::Remote)
                    .map(|()| ReplyValue::Void)
                    .map_err(remote_error)
            }
        })
    }
}

/// Broker-hosted install service stub over the backend
pub struct FakeInstallService {
    backend: Arc<InstallerBackend>,
    stub: StubDispatcher,
}

impl FakeInstallService {
    /// Stub decoding with the caller's opcode resolution
    pub fn new(
        backend: Arc<InstallerBackend>,
        opcodes: Arc<OpcodeResolver>,
        codec: WireCodec,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            stub: StubDispatcher::new(InterfaceFamily::InstallService, opcodes, codec),
        })
    }
}

impl RemoteBinder for FakeInstallService {
    fn transact(&self, code: u32, data: Parcel, _flags: u32) -> Result<Parcel> {
        self.stub.serve(code, data, |spec, mut args| match spec.name {
            name if name == install_service::CREATE_INSTALL_SESSION.name => self
                .backend
                .create(None)
                .map(ReplyValue::I32)
                .map_err(remote_error),
            name if name == install_service::WRITE_TO_SESSION.name => {
                let id = arg_i32(&args, 0)?;
                let entry = arg_str(&args, 1)?;
                let fd = match args.pop() {
                    Some(WireValue::Fd(Some(fd))) => fd,
                    other => {
                        return Err(RemoteException::new(
                            ExceptionKind::IllegalArgument,
                            format!("expected a descriptor, got {other:?}"),
                        ))
                    }
                };
                let mut reader = fd.into_reader().map_err(remote_error)?;
                let mut sink = self.backend.open_sink(id, &entry).map_err(remote_error)?;
                io::copy(&mut reader, &mut sink)
                    .map_err(|e| RemoteException::new(ExceptionKind::IllegalState, e.to_string()))?;
                Ok(ReplyValue::Void)
            }
            name if name == install_service::COMMIT_SESSION.name => {
                let id = arg_i32(&args, 0)?;
                self.backend
                    .commit(id, Surface::Service)
                    .map(|()| ReplyValue::Void)
                    .map_err(remote_error)
            }
            name if name == install_service::ABANDON_SESSION.name => {
                let id = arg_i32(&args, 0)?;
                self.backend
                    .abandon(id, Surface::Service)
                    .map(|()| ReplyValue::Void)
                    .map_err(remote_error)
            }
            _ => {
                self.backend.state.lock().destroyed = true;
                Ok(ReplyValue::Void)
            }
        })
    }
}

/// Result delivery that hands out inert status receivers
#[derive(Default)]
pub struct FakeResultDelivery {
    requests: Mutex<Vec<(i32, i32)>>,
}

impl FakeResultDelivery {
    /// No requests yet
    pub fn new() -> Self {
        Self::default()
    }

    /// `(session_id, flags)` of every status target produced
    pub fn requests(&self) -> Vec<(i32, i32)> {
        self.requests.lock().clone()
    }
}

impl ResultDeliveryEffects for FakeResultDelivery {
    fn status_target(&self, session_id: i32, flags: i32) -> Result<Arc<dyn RemoteBinder>> {
        self.requests.lock().push((session_id, flags));
        Ok(ScriptedBinder::inert(format!("status-receiver-{session_id}")))
    }
}
