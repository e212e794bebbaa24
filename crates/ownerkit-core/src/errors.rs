//! Unified error system for the privileged-operation proxy
//!
//! Every fallible operation returns [`Result`]. The boolean-collapsing
//! client surface is built on top of these errors, never the other way round.

use std::fmt;

use crate::schema::InterfaceFamily;
use crate::types::SessionState;

/// Kind of exception carried in a reply's exception marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// `SecurityException` (-1)
    Security,
    /// `BadParcelableException` (-2)
    BadParcelable,
    /// `IllegalArgumentException` (-3)
    IllegalArgument,
    /// `NullPointerException` (-4)
    NullPointer,
    /// `IllegalStateException` (-5)
    IllegalState,
    /// `NetworkOnMainThreadException` (-6)
    NetworkMainThread,
    /// `UnsupportedOperationException` (-7)
    UnsupportedOperation,
    /// `ServiceSpecificException` (-8) with its service error code
    ServiceSpecific(i32),
    /// Parcelable exception (-9)
    Parcelable,
    /// Any other non-zero marker
    Unknown(i32),
}

impl ExceptionKind {
    /// Map a wire exception code to a kind. `service_code` is only used for -8.
    pub fn from_code(code: i32, service_code: i32) -> Self {
        match code {
            -1 => Self::Security,
            -2 => Self::BadParcelable,
            -3 => Self::IllegalArgument,
            -4 => Self::NullPointer,
            -5 => Self::IllegalState,
            -6 => Self::NetworkMainThread,
            -7 => Self::UnsupportedOperation,
            -8 => Self::ServiceSpecific(service_code),
            -9 => Self::Parcelable,
            other => Self::Unknown(other),
        }
    }

    /// Wire exception code for this kind
    pub fn code(&self) -> i32 {
        match self {
            Self::Security => -1,
            Self::BadParcelable => -2,
            Self::IllegalArgument => -3,
            Self::NullPointer => -4,
            Self::IllegalState => -5,
            Self::NetworkMainThread => -6,
            Self::UnsupportedOperation => -7,
            Self::ServiceSpecific(_) => -8,
            Self::Parcelable => -9,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Security => write!(f, "SecurityException"),
            Self::BadParcelable => write!(f, "BadParcelableException"),
            Self::IllegalArgument => write!(f, "IllegalArgumentException"),
            Self::NullPointer => write!(f, "NullPointerException"),
            Self::IllegalState => write!(f, "IllegalStateException"),
            Self::NetworkMainThread => write!(f, "NetworkOnMainThreadException"),
            Self::UnsupportedOperation => write!(f, "UnsupportedOperationException"),
            Self::ServiceSpecific(code) => write!(f, "ServiceSpecificException({code})"),
            Self::Parcelable => write!(f, "ParcelableException"),
            Self::Unknown(code) => write!(f, "UnknownException({code})"),
        }
    }
}

/// Exception raised by the remote side of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteException {
    /// Which exception the remote raised
    pub kind: ExceptionKind,
    /// Message written alongside the marker, if any
    pub message: Option<String>,
}

impl RemoteException {
    /// Create a remote exception
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for RemoteException {}

/// Unified error type for all proxy operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    /// Neither direct nor delegated authority is usable
    #[error("No device owner authority available")]
    AuthorityUnavailable,

    /// No dispatch code could be resolved for the operation
    #[error("Operation rejected: no dispatch code for {family}.{operation}")]
    OperationRejected {
        /// Interface family of the operation
        family: InterfaceFamily,
        /// Operation name
        operation: String,
    },

    /// The remote side answered with an exception marker
    #[error("Remote exception: {0}")]
    Remote(RemoteException),

    /// The transaction itself failed (dead object, transport failure)
    #[error("Transaction failed: {message}")]
    Transaction {
        /// Error message describing the transaction failure
        message: String,
    },

    /// Request encoding or reply decoding failed
    #[error("Codec error: {message}")]
    Codec {
        /// Error message describing the codec failure
        message: String,
    },

    /// I/O failure while streaming package bytes
    #[error("I/O error: {message}")]
    Io {
        /// Error message describing the I/O failure
        message: String,
    },

    /// The session is in a state that does not allow the attempted step
    #[error("Session {session_id} is {state}, cannot {attempted}")]
    SessionState {
        /// Session id assigned by the installer
        session_id: i32,
        /// Current lifecycle state
        state: SessionState,
        /// Step that was refused
        attempted: &'static str,
    },

    /// Archive contained no installable entries
    #[error("No .apk files found in archive")]
    NoInstallableEntries,

    /// The stream conduit did not drain within the bounded wait
    #[error("Stream conduit timed out after {timeout_ms}ms")]
    StreamTimeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Delegation broker call failed
    #[error("Broker error: {message}")]
    Broker {
        /// Error message describing the broker failure
        message: String,
    },

    /// A system service or session handle could not be obtained
    #[error("Service handle unavailable: {service}")]
    HandleUnavailable {
        /// Name of the missing service or handle
        service: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration problem
        message: String,
    },

    /// Internal failure (worker panicked, task cancelled)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl ProxyError {
    /// Create an operation-rejected error
    pub fn rejected(family: InterfaceFamily, operation: impl Into<String>) -> Self {
        Self::OperationRejected {
            family,
            operation: operation.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a broker error
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker {
            message: message.into(),
        }
    }

    /// Create a handle-unavailable error
    pub fn handle_unavailable(service: impl Into<String>) -> Self {
        Self::HandleUnavailable {
            service: service.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the remote side raised an exception
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl From<RemoteException> for ProxyError {
    fn from(exception: RemoteException) -> Self {
        Self::Remote(exception)
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<zip::result::ZipError> for ProxyError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::io(format!("archive: {err}"))
    }
}

impl From<toml::de::Error> for ProxyError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Standard result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
