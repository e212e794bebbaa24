//! Install session orchestration
//!
//! A session goes CREATE, then per entry OPEN-WRITE, STREAM-COPY, SYNC and
//! CLOSE, then COMMIT with a result-delivery target. Any failure before the
//! commit is accepted abandons the session exactly once.
//!
//! Routes, chosen at creation from the live authority mode:
//!
//! - direct or none: the local installer end to end
//! - delegated with the broker install service bound: the service end to end
//! - delegated, [`DelegatedRoute::WrappedInstaller`] (default): create, write
//!   and commit through the broker-wrapped package installer, falling back
//!   once to the unwrapped session handle for the commit
//! - delegated, [`DelegatedRoute::BrokerCommit`]: local create and write,
//!   commit through the broker-wrapped session handle, falling back once to
//!   the local commit

pub mod archive;
pub mod conduit;
pub mod ledger;

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ownerkit_core::effects::{
    FailureLog, LocalInstallerEffects, RemoteBinder, ResultDeliveryEffects,
    ServiceRegistryEffects, FLAG_MUTABLE, FLAG_UPDATE_CURRENT,
};
use ownerkit_core::schema::{install_service, installer_session, package_installer};
use ownerkit_core::{
    sdk, AuthorityMode, DelegatedRoute, OpcodeResolver, OperationSpec, ParcelFd, ProxyConfig,
    ProxyError, ReplyValue, Result, SessionParams, SessionState, WireCodec, WireValue,
};
use zip::ZipArchive;

use crate::authority::AuthorityModeResolver;
use crate::broker::DelegatedBrokerConnector;
use archive::{installable_entries, PackageKind};
use conduit::{copy_chunked, stream_through};
use ledger::SessionLedger;

const TAG: &str = "InstallSession";
/// Session entry name used for single-package installs
pub const SINGLE_PACKAGE_ENTRY: &str = "package";

/// Pending-intent flags for the status receiver on `sdk_level`
pub fn status_target_flags(sdk_level: u32) -> i32 {
    if sdk_level >= sdk::S {
        FLAG_UPDATE_CURRENT | FLAG_MUTABLE
    } else {
        FLAG_UPDATE_CURRENT
    }
}

enum SessionRoute {
    Local,
    BrokerCommit,
    WrappedInstaller {
        installer: Arc<dyn RemoteBinder>,
        raw_session: Arc<dyn RemoteBinder>,
        session: Arc<dyn RemoteBinder>,
    },
    InstallService {
        service: Arc<dyn RemoteBinder>,
    },
}

impl SessionRoute {
    fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::BrokerCommit => "broker-commit",
            Self::WrappedInstaller { .. } => "wrapped-installer",
            Self::InstallService { .. } => "install-service",
        }
    }
}

/// An open install session
pub struct InstallSession {
    id: i32,
    mode: AuthorityMode,
    route: SessionRoute,
    entries: Vec<String>,
    bytes_written: u64,
}

impl InstallSession {
    /// Id assigned by the installer
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Authority mode the session was created under
    pub fn mode(&self) -> AuthorityMode {
        self.mode
    }

    /// Entry names written so far
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Route name, for diagnostics
    pub fn route(&self) -> &'static str {
        self.route.name()
    }
}

/// Summary of a submitted install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    /// Committed session id
    pub session_id: i32,
    /// Authority mode used
    pub mode: AuthorityMode,
    /// Entry names written
    pub entries: Vec<String>,
    /// Total bytes streamed
    pub bytes_written: u64,
}

/// Drives install sessions through the active authority path
pub struct InstallSessionBroker {
    resolver: Arc<AuthorityModeResolver>,
    broker: Arc<DelegatedBrokerConnector>,
    installer: Arc<dyn LocalInstallerEffects>,
    services: Arc<dyn ServiceRegistryEffects>,
    delivery: Arc<dyn ResultDeliveryEffects>,
    opcodes: Arc<OpcodeResolver>,
    codec: WireCodec,
    log: Arc<dyn FailureLog>,
    ledger: SessionLedger,
    route: DelegatedRoute,
    chunk_bytes: usize,
    stream_timeout: Duration,
}

impl InstallSessionBroker {
    /// Create a session broker
    pub fn new(
        resolver: Arc<AuthorityModeResolver>,
        broker: Arc<DelegatedBrokerConnector>,
        installer: Arc<dyn LocalInstallerEffects>,
        services: Arc<dyn ServiceRegistryEffects>,
        delivery: Arc<dyn ResultDeliveryEffects>,
        opcodes: Arc<OpcodeResolver>,
        codec: WireCodec,
        log: Arc<dyn FailureLog>,
        config: &ProxyConfig,
    ) -> Self {
        Self {
            resolver,
            broker,
            installer,
            services,
            delivery,
            opcodes,
            codec,
            log,
            ledger: SessionLedger::new(),
            route: config.delegated_route,
            chunk_bytes: config.copy_chunk_bytes,
            stream_timeout: config.stream_timeout(),
        }
    }

    /// Lifecycle state of a session id created by this broker
    pub fn session_state(&self, session_id: i32) -> Option<SessionState> {
        self.ledger.state(session_id)
    }

    /// Allocate a session through the active authority
    pub fn create_session(&self) -> Result<InstallSession> {
        let mode = self.resolver.resolve();
        let (id, route) = match mode {
            AuthorityMode::Delegated => self.create_delegated()?,
            AuthorityMode::Direct | AuthorityMode::None => (
                self.installer.create_session(&SessionParams::full_install())?,
                SessionRoute::Local,
            ),
        };
        self.ledger.register(id);
        tracing::info!(session_id = id, %mode, route = route.name(), "install session created");
        Ok(InstallSession {
            id,
            mode,
            route,
            entries: Vec::new(),
            bytes_written: 0,
        })
    }

    fn create_delegated(&self) -> Result<(i32, SessionRoute)> {
        if let Some(service) = self.broker.install_service() {
            let id = self
                .call(&service, &install_service::CREATE_INSTALL_SESSION, Vec::new())?
                .into_i32()?;
            return Ok((id, SessionRoute::InstallService { service }));
        }

        match self.route {
            DelegatedRoute::BrokerCommit => Ok((
                self.installer.create_session(&SessionParams::full_install())?,
                SessionRoute::BrokerCommit,
            )),
            DelegatedRoute::WrappedInstaller => self.create_through_wrapped_installer(),
        }
    }

    fn create_through_wrapped_installer(&self) -> Result<(i32, SessionRoute)> {
        let installer = self
            .services
            .package_installer()
            .ok_or_else(|| ProxyError::handle_unavailable("package_installer"))?;
        let installer = self.broker.wrap(installer)?;
        let owner = self.broker.owner_component()?;

        let mut args = vec![
            WireValue::SessionParams(Some(SessionParams::full_install())),
            WireValue::str(owner.package),
        ];
        if self.codec.sdk_level() >= sdk::S {
            args.push(WireValue::Str(None));
        }
        args.push(WireValue::I32(0));
        let id = self
            .call(&installer, &package_installer::CREATE_SESSION, args)?
            .into_i32()?;

        let opened = self
            .call(&installer, &package_installer::OPEN_SESSION, vec![WireValue::I32(id)])
            .and_then(ReplyValue::into_binder)
            .and_then(|binder| {
                binder.ok_or_else(|| {
                    ProxyError::handle_unavailable(format!("installer session {id}"))
                })
            })
            .and_then(|raw| Ok((Arc::clone(&raw), self.broker.wrap(raw)?)));

        match opened {
            Ok((raw_session, session)) => Ok((
                id,
                SessionRoute::WrappedInstaller {
                    installer,
                    raw_session,
                    session,
                },
            )),
            Err(err) => {
                let abandon = vec![WireValue::I32(id)];
                if let Err(abandon_err) =
                    self.call(&installer, &package_installer::ABANDON_SESSION, abandon)
                {
                    self.log.record(
                        TAG,
                        &format!("Abandon of unopened session {id} failed: {abandon_err}"),
                    );
                }
                Err(err)
            }
        }
    }

    /// Stream one named entry into the session
    ///
    /// On failure the session is abandoned before the error is returned.
    pub fn write_entry<R: Read + ?Sized>(
        &self,
        session: &mut InstallSession,
        name: &str,
        length: Option<u64>,
        input: &mut R,
    ) -> Result<u64> {
        self.ledger.begin_write(session.id)?;
        match self.stream_entry(session, name, length, input) {
            Ok(written) => {
                session.entries.push(name.to_string());
                session.bytes_written += written;
                tracing::debug!(session_id = session.id, entry = name, written, "entry written");
                Ok(written)
            }
            Err(err) => {
                self.fail(session, "write", &err);
                Err(err)
            }
        }
    }

    fn stream_entry<R: Read + ?Sized>(
        &self,
        session: &InstallSession,
        name: &str,
        length: Option<u64>,
        input: &mut R,
    ) -> Result<u64> {
        let length = length.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1);
        match &session.route {
            SessionRoute::Local | SessionRoute::BrokerCommit => {
                let mut sink = self.installer.open_write(session.id, name, 0, length)?;
                let written = copy_chunked(input, &mut sink, self.chunk_bytes)?;
                self.installer.fsync(session.id, name)?;
                drop(sink);
                Ok(written)
            }
            SessionRoute::WrappedInstaller { session: remote, .. } => {
                let args = vec![WireValue::str(name), WireValue::I64(0), WireValue::I64(length)];
                let sink = self
                    .call(remote, &installer_session::OPEN_WRITE, args)?
                    .into_fd()?
                    .ok_or_else(|| {
                        ProxyError::transaction(format!("openWrite({name}) returned no descriptor"))
                    })?
                    .into_writer()?;
                let written = stream_through(
                    input,
                    self.chunk_bytes,
                    self.stream_timeout,
                    move |mut reader| {
                        let mut sink = sink;
                        std::io::copy(&mut reader, &mut sink)?;
                        sink.flush()?;
                        Ok(())
                    },
                )?;
                self.sync_remote(session.id, remote, name);
                Ok(written)
            }
            SessionRoute::InstallService { service } => {
                let service = Arc::clone(service);
                let opcodes = Arc::clone(&self.opcodes);
                let codec = self.codec;
                let session_id = session.id;
                let name = name.to_string();
                stream_through(input, self.chunk_bytes, self.stream_timeout, move |reader| {
                    let args = vec![
                        WireValue::I32(session_id),
                        WireValue::Str(Some(name)),
                        WireValue::Fd(Some(ParcelFd::Reader(Box::new(reader)))),
                    ];
                    remote_call(
                        service.as_ref(),
                        &opcodes,
                        codec,
                        &install_service::WRITE_TO_SESSION,
                        args,
                    )
                    .map(|_| ())
                })
            }
        }
    }

    // The descriptor is already flushed and closed; a remote sync is best effort.
    fn sync_remote(&self, session_id: i32, remote: &Arc<dyn RemoteBinder>, name: &str) {
        match self.call(remote, &installer_session::FSYNC, vec![WireValue::str(name)]) {
            Ok(_) => {}
            Err(ProxyError::OperationRejected { .. }) => {
                tracing::debug!(session_id, entry = name, "remote fsync unavailable");
            }
            Err(err) => self.log.record(
                TAG,
                &format!("Remote fsync of {name} in session {session_id} failed: {err}"),
            ),
        }
    }

    /// Submit the session
    ///
    /// Success means the installer accepted the commit; the install outcome
    /// arrives later at the result-delivery target. On failure the session
    /// is abandoned.
    pub fn commit(&self, session: &mut InstallSession) -> Result<()> {
        self.ledger.ensure_open(session.id, "commit")?;
        match self.submit(session) {
            Ok(()) => {
                self.ledger.mark_committed(session.id)?;
                tracing::info!(
                    session_id = session.id,
                    entries = session.entries.len(),
                    route = session.route.name(),
                    "install session committed"
                );
                Ok(())
            }
            Err(err) => {
                self.fail(session, "commit", &err);
                Err(err)
            }
        }
    }

    fn submit(&self, session: &InstallSession) -> Result<()> {
        let flags = status_target_flags(self.codec.sdk_level());
        let target = self.delivery.status_target(session.id, flags)?;

        let delegated = match &session.route {
            SessionRoute::Local => return self.installer.commit(session.id, &target),
            SessionRoute::InstallService { service } => {
                let args = vec![WireValue::I32(session.id)];
                return self
                    .call(service, &install_service::COMMIT_SESSION, args)
                    .map(|_| ());
            }
            SessionRoute::BrokerCommit => self
                .installer
                .session_binder(session.id)
                .ok_or_else(|| {
                    ProxyError::handle_unavailable(format!("installer session {}", session.id))
                })
                .and_then(|raw| self.broker.wrap(raw))
                .and_then(|wrapped| self.commit_remote(&wrapped, &target)),
            SessionRoute::WrappedInstaller { session: wrapped, .. } => {
                self.commit_remote(wrapped, &target)
            }
        };

        let Err(err) = delegated else {
            return Ok(());
        };
        self.log.record(
            TAG,
            &format!(
                "Delegated commit of session {} failed, using standard commit: {err}",
                session.id
            ),
        );
        match &session.route {
            SessionRoute::WrappedInstaller { raw_session, .. } => {
                self.commit_remote(raw_session, &target)
            }
            _ => self.installer.commit(session.id, &target),
        }
    }

    fn commit_remote(
        &self,
        session: &Arc<dyn RemoteBinder>,
        target: &Arc<dyn RemoteBinder>,
    ) -> Result<()> {
        let mut args = vec![WireValue::StatusReceiver(Some(Arc::clone(target)))];
        if self.codec.sdk_level() >= sdk::P {
            args.push(WireValue::Bool(false));
        }
        self.call(session, &installer_session::COMMIT, args).map(|_| ())
    }

    /// Discard the session
    ///
    /// Returns `false` without side effects when the session is already
    /// committed or abandoned. Remote abandon failures are logged; the
    /// session counts as abandoned either way.
    pub fn abandon(&self, session: &mut InstallSession) -> bool {
        if !self.ledger.mark_abandoned(session.id) {
            tracing::debug!(session_id = session.id, "abandon ignored for terminal session");
            return false;
        }
        let id = session.id;
        let result = match &session.route {
            SessionRoute::Local | SessionRoute::BrokerCommit => self.installer.abandon(id),
            SessionRoute::WrappedInstaller { installer, .. } => self
                .call(installer, &package_installer::ABANDON_SESSION, vec![WireValue::I32(id)])
                .map(|_| ()),
            SessionRoute::InstallService { service } => self
                .call(service, &install_service::ABANDON_SESSION, vec![WireValue::I32(id)])
                .map(|_| ()),
        };
        if let Err(err) = result {
            self.log
                .record(TAG, &format!("Abandon of session {id} failed: {err}"));
        }
        tracing::info!(session_id = id, "install session abandoned");
        true
    }

    fn fail(&self, session: &mut InstallSession, step: &str, err: &ProxyError) {
        self.log
            .record(TAG, &format!("Session {} {step} failed: {err}", session.id));
        self.abandon(session);
    }

    /// Install a single package read from `input`
    pub fn install_package<R: Read + ?Sized>(
        &self,
        length: Option<u64>,
        input: &mut R,
    ) -> Result<InstallReceipt> {
        let mut session = self.create_session()?;
        self.write_entry(&mut session, SINGLE_PACKAGE_ENTRY, length, input)?;
        self.commit(&mut session)?;
        Ok(receipt(session))
    }

    /// Install every package member of a zip bundle in one session
    ///
    /// A bundle without package members abandons the session and fails with
    /// [`ProxyError::NoInstallableEntries`]; nothing is committed.
    pub fn install_archive<R: Read + Seek>(&self, input: R) -> Result<InstallReceipt> {
        let mut archive = ZipArchive::new(input)?;
        let mut session = self.create_session()?;

        let written = self.write_archive(&mut session, &mut archive);
        match written {
            Ok(0) => {
                let err = ProxyError::NoInstallableEntries;
                self.fail(&mut session, "scan", &err);
                Err(err)
            }
            Ok(_) => {
                self.commit(&mut session)?;
                Ok(receipt(session))
            }
            Err(err) => {
                // no-op when a failed write already abandoned
                self.abandon(&mut session);
                Err(err)
            }
        }
    }

    fn write_archive<R: Read + Seek>(
        &self,
        session: &mut InstallSession,
        archive: &mut ZipArchive<R>,
    ) -> Result<usize> {
        let entries = installable_entries(archive)?;
        for entry in &entries {
            let mut member = archive.by_index(entry.index)?;
            self.write_entry(session, &entry.session_name, Some(entry.size), &mut member)?;
        }
        Ok(entries.len())
    }

    /// Install a file, detecting whether it is a single package or a bundle
    pub fn install_path(&self, path: &Path, mime: Option<&str>) -> Result<InstallReceipt> {
        let kind = PackageKind::detect(path, mime)?;
        let mut file = File::open(path)?;
        match kind {
            PackageKind::Apk => {
                let length = file.metadata().ok().map(|m| m.len());
                self.install_package(length, &mut file)
            }
            PackageKind::Archive => self.install_archive(file),
        }
    }

    /// Tell the broker install service to tear down and forget its handle
    pub fn release_install_service(&self) {
        let Some(service) = self.broker.take_install_service() else {
            return;
        };
        if let Err(err) = self.call(&service, &install_service::DESTROY, Vec::new()) {
            self.log
                .record(TAG, &format!("Install service destroy failed: {err}"));
        }
    }

    fn call(
        &self,
        binder: &Arc<dyn RemoteBinder>,
        spec: &OperationSpec,
        args: Vec<WireValue>,
    ) -> Result<ReplyValue> {
        remote_call(binder.as_ref(), &self.opcodes, self.codec, spec, args)
    }
}

fn remote_call(
    binder: &dyn RemoteBinder,
    opcodes: &OpcodeResolver,
    codec: WireCodec,
    spec: &OperationSpec,
    args: Vec<WireValue>,
) -> Result<ReplyValue> {
    let code = opcodes.resolve_spec(spec)?;
    let request = codec.encode_request(spec, args)?;
    tracing::debug!(operation = %spec, code, "installer transaction");
    let mut reply = binder.transact(code, request, 0)?;
    codec.decode_reply(spec, &mut reply)
}

fn receipt(session: InstallSession) -> InstallReceipt {
    InstallReceipt {
        session_id: session.id,
        mode: session.mode,
        entries: session.entries,
        bytes_written: session.bytes_written,
    }
}
