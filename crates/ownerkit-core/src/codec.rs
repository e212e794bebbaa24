//! Schema-driven request/reply codec
//!
//! Requests are the interface token followed by each field of the
//! [`OperationSpec`] that exists on the codec's platform version, in order.
//! Replies start with the exception marker; a set marker ends decoding with
//! [`ProxyError::Remote`]. There is no schema negotiation: both sides must
//! agree byte for byte.

use std::fmt;
use std::sync::Arc;

use crate::effects::RemoteBinder;
use crate::errors::{ProxyError, RemoteException, Result};
use crate::parcel::{Parcel, ParcelFd};
use crate::schema::{FieldKind, FieldSpec, OperationSpec, ReplyKind};
use crate::types::{ComponentName, SessionParams};

/// One request argument
pub enum WireValue {
    /// Fixed-width i32
    I32(i32),
    /// Fixed-width i64
    I64(i64),
    /// Boolean
    Bool(bool),
    /// Nullable string
    Str(Option<String>),
    /// Nullable component identity
    Component(Option<ComponentName>),
    /// Nullable session parameters
    SessionParams(Option<SessionParams>),
    /// Nullable status receiver (intent sender binder)
    StatusReceiver(Option<Arc<dyn RemoteBinder>>),
    /// Nullable file descriptor
    Fd(Option<ParcelFd>),
}

impl WireValue {
    /// Non-null string argument
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(Some(value.into()))
    }

    /// Field kind this value encodes as
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::I32(_) => FieldKind::I32,
            Self::I64(_) => FieldKind::I64,
            Self::Bool(_) => FieldKind::Bool,
            Self::Str(_) => FieldKind::String16,
            Self::Component(_) => FieldKind::Component,
            Self::SessionParams(_) => FieldKind::SessionParams,
            Self::StatusReceiver(_) => FieldKind::StatusReceiver,
            Self::Fd(_) => FieldKind::FileDescriptor,
        }
    }
}

impl fmt::Debug for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "I32({v})"),
            Self::I64(v) => write!(f, "I64({v})"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Str(v) => write!(f, "Str({v:?})"),
            Self::Component(v) => write!(f, "Component({v:?})"),
            Self::SessionParams(v) => write!(f, "SessionParams({v:?})"),
            Self::StatusReceiver(v) => {
                write!(f, "StatusReceiver({})", if v.is_some() { "binder" } else { "null" })
            }
            Self::Fd(v) => write!(f, "Fd({v:?})"),
        }
    }
}

/// Decoded reply result
pub enum ReplyValue {
    /// No result
    Void,
    /// An i32 result
    I32(i32),
    /// A boolean result
    Bool(bool),
    /// A binder result
    Binder(Option<Arc<dyn RemoteBinder>>),
    /// A descriptor result
    Fd(Option<ParcelFd>),
}

impl ReplyValue {
    /// Reply kind this value encodes as
    pub fn kind(&self) -> ReplyKind {
        match self {
            Self::Void => ReplyKind::Void,
            Self::I32(_) => ReplyKind::I32,
            Self::Bool(_) => ReplyKind::Bool,
            Self::Binder(_) => ReplyKind::Binder,
            Self::Fd(_) => ReplyKind::FileDescriptor,
        }
    }

    fn mismatch(&self, wanted: &str) -> ProxyError {
        ProxyError::codec(format!("expected {wanted} reply, got {:?}", self.kind()))
    }

    /// Take a boolean result
    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            other => Err(other.mismatch("bool")),
        }
    }

    /// Take an i32 result
    pub fn into_i32(self) -> Result<i32> {
        match self {
            Self::I32(v) => Ok(v),
            other => Err(other.mismatch("i32")),
        }
    }

    /// Take a binder result
    pub fn into_binder(self) -> Result<Option<Arc<dyn RemoteBinder>>> {
        match self {
            Self::Binder(v) => Ok(v),
            other => Err(other.mismatch("binder")),
        }
    }

    /// Take a descriptor result
    pub fn into_fd(self) -> Result<Option<ParcelFd>> {
        match self {
            Self::Fd(v) => Ok(v),
            other => Err(other.mismatch("fd")),
        }
    }
}

impl fmt::Debug for ReplyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "Void"),
            Self::I32(v) => write!(f, "I32({v})"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Binder(v) => write!(f, "Binder({})", if v.is_some() { "binder" } else { "null" }),
            Self::Fd(v) => write!(f, "Fd({v:?})"),
        }
    }
}

/// Encoder/decoder for one platform version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireCodec {
    sdk_level: u32,
}

impl WireCodec {
    /// Create a codec for `sdk_level`
    pub fn new(sdk_level: u32) -> Self {
        Self { sdk_level }
    }

    /// Platform version this codec targets
    pub fn sdk_level(&self) -> u32 {
        self.sdk_level
    }

    fn fields(&self, spec: &OperationSpec, arg_count: usize) -> Result<Vec<&'static FieldSpec>> {
        let fields: Vec<_> = spec.fields_for(self.sdk_level).collect();
        if fields.len() != arg_count {
            return Err(ProxyError::codec(format!(
                "{spec} takes {} arguments on API {}, got {arg_count}",
                fields.len(),
                self.sdk_level
            )));
        }
        Ok(fields)
    }

    /// Build the request parcel for `spec`
    ///
    /// `args` must match the fields present on this platform version, in
    /// order and kind.
    pub fn encode_request(&self, spec: &OperationSpec, args: Vec<WireValue>) -> Result<Parcel> {
        let fields = self.fields(spec, args.len())?;
        let mut parcel = Parcel::new();
        parcel.write_interface_token(spec.family.descriptor(), self.sdk_level);
        for (field, value) in fields.into_iter().zip(args) {
            write_field(&mut parcel, spec, field, value)?;
        }
        Ok(parcel)
    }

    /// Decode a reply parcel for `spec`
    pub fn decode_reply(&self, spec: &OperationSpec, reply: &mut Parcel) -> Result<ReplyValue> {
        if let Some(exception) = reply.read_exception()? {
            return Err(ProxyError::Remote(exception));
        }
        let value = match spec.reply {
            ReplyKind::Void => ReplyValue::Void,
            ReplyKind::I32 => ReplyValue::I32(reply.read_i32()?),
            ReplyKind::Bool => ReplyValue::Bool(reply.read_bool()?),
            ReplyKind::Binder => ReplyValue::Binder(reply.read_strong_binder()?),
            ReplyKind::FileDescriptor => match reply.read_i32()? {
                0 => ReplyValue::Fd(None),
                _ => ReplyValue::Fd(Some(reply.read_parcel_file_descriptor()?)),
            },
        };
        Ok(value)
    }

    /// Decode a request parcel (the serving side of [`Self::encode_request`])
    pub fn decode_request(&self, spec: &OperationSpec, data: &mut Parcel) -> Result<Vec<WireValue>> {
        data.enforce_interface(spec.family.descriptor(), self.sdk_level)?;
        spec.fields_for(self.sdk_level)
            .map(|field| read_field(data, field))
            .collect()
    }

    /// Build a reply parcel (the serving side of [`Self::decode_reply`])
    pub fn encode_reply(
        &self,
        spec: &OperationSpec,
        outcome: std::result::Result<ReplyValue, RemoteException>,
    ) -> Result<Parcel> {
        let mut parcel = Parcel::new();
        let value = match outcome {
            Ok(value) => value,
            Err(exception) => {
                parcel.write_exception(&exception);
                return Ok(parcel);
            }
        };
        if value.kind() != spec.reply {
            return Err(ProxyError::codec(format!(
                "{spec} replies {:?}, got {value:?}",
                spec.reply
            )));
        }
        parcel.write_no_exception();
        match value {
            ReplyValue::Void => {}
            ReplyValue::I32(v) => parcel.write_i32(v),
            ReplyValue::Bool(v) => parcel.write_bool(v),
            ReplyValue::Binder(v) => parcel.write_strong_binder(v),
            ReplyValue::Fd(None) => parcel.write_i32(0),
            ReplyValue::Fd(Some(fd)) => {
                parcel.write_i32(1);
                parcel.write_parcel_file_descriptor(fd);
            }
        }
        Ok(parcel)
    }
}

fn write_field(
    parcel: &mut Parcel,
    spec: &OperationSpec,
    field: &FieldSpec,
    value: WireValue,
) -> Result<()> {
    match (field.kind, value) {
        (FieldKind::I32, WireValue::I32(v)) => parcel.write_i32(v),
        (FieldKind::I64, WireValue::I64(v)) => parcel.write_i64(v),
        (FieldKind::Bool, WireValue::Bool(v)) => parcel.write_bool(v),
        (FieldKind::String16, WireValue::Str(v)) => parcel.write_string16(v.as_deref()),
        (FieldKind::Component, WireValue::Component(v)) => parcel.write_nullable(v.as_ref()),
        (FieldKind::SessionParams, WireValue::SessionParams(v)) => {
            parcel.write_nullable(v.as_ref());
        }
        (FieldKind::StatusReceiver, WireValue::StatusReceiver(v)) => match v {
            Some(binder) => {
                parcel.write_i32(1);
                parcel.write_strong_binder(Some(binder));
            }
            None => parcel.write_i32(0),
        },
        (FieldKind::FileDescriptor, WireValue::Fd(v)) => match v {
            Some(fd) => {
                parcel.write_i32(1);
                parcel.write_parcel_file_descriptor(fd);
            }
            None => parcel.write_i32(0),
        },
        (kind, value) => {
            return Err(ProxyError::codec(format!(
                "{spec}: field '{}' is {kind}, got {}",
                field.name,
                value.kind()
            )));
        }
    }
    Ok(())
}

fn read_field(data: &mut Parcel, field: &FieldSpec) -> Result<WireValue> {
    let value = match field.kind {
        FieldKind::I32 => WireValue::I32(data.read_i32()?),
        FieldKind::I64 => WireValue::I64(data.read_i64()?),
        FieldKind::Bool => WireValue::Bool(data.read_bool()?),
        FieldKind::String16 => WireValue::Str(data.read_string16()?),
        FieldKind::Component => WireValue::Component(data.read_nullable()?),
        FieldKind::SessionParams => WireValue::SessionParams(data.read_nullable()?),
        FieldKind::StatusReceiver => match data.read_i32()? {
            0 => WireValue::StatusReceiver(None),
            _ => WireValue::StatusReceiver(data.read_strong_binder()?),
        },
        FieldKind::FileDescriptor => match data.read_i32()? {
            0 => WireValue::Fd(None),
            _ => WireValue::Fd(Some(data.read_parcel_file_descriptor()?)),
        },
    };
    Ok(value)
}
