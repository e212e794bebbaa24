//! ownerkit Core - wire model and effect interfaces
//!
//! This crate holds everything about privileged operations that does not
//! depend on a live device: the binder parcel buffer, the versioned schema
//! table, the schema-driven codec, dispatch code resolution, configuration,
//! and the effect traits the orchestration layer is written against.
//!
//! # Layers
//!
//! - `parcel`, `codec`: byte-for-byte request/reply encoding
//! - `schema`, `opcode`: what to send and which code to send it with
//! - `effects`: platform, broker and ambient collaborators
//! - `config`, `errors`: ambient plumbing

#![forbid(unsafe_code)]

/// Schema-driven request/reply codec
pub mod codec;

/// Proxy configuration
pub mod config;

/// Effect interfaces for platform collaborators
pub mod effects;

/// Unified error handling
pub mod errors;

/// Dispatch code resolution
pub mod opcode;

/// Binder parcel buffer
pub mod parcel;

/// Versioned request schema table
pub mod schema;

/// Shared domain types
pub mod types;

/// Platform API levels referenced by the schema and codec
pub mod sdk {
    /// Android 8.1
    pub const O_MR1: u32 = 27;
    /// Android 9
    pub const P: u32 = 28;
    /// Android 10
    pub const Q: u32 = 29;
    /// Android 11
    pub const R: u32 = 30;
    /// Android 12
    pub const S: u32 = 31;
}

pub use codec::{ReplyValue, WireCodec, WireValue};
pub use config::{DelegatedRoute, ProxyConfig};
pub use effects::{
    BrokerEffects, DevicePolicyEffects, DispatchTableEffects, FailureLog, LocalInstallerEffects,
    MainThreadEffects, MainThreadTask, PackageQueryEffects, PermissionListener, RemoteBinder,
    ResultDeliveryEffects, ServiceConnection, ServiceRegistryEffects, TracingFailureLog,
};
pub use errors::{ExceptionKind, ProxyError, RemoteException, Result};
pub use opcode::{FallbackTable, OpcodeResolver, OpcodeRow, OpcodeSource, UNRESOLVED_OPCODE};
pub use parcel::{Parcel, ParcelFd, Parcelable};
pub use schema::{FieldKind, InterfaceFamily, OperationSpec, ReplyKind};
pub use types::{
    AuthorityMode, ComponentName, GrantState, HostContext, InstallOutcome, SessionParams,
    SessionState,
};
