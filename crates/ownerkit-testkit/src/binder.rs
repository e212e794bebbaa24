//! Scripted remote handles and reply builders

use std::sync::Arc;

use ownerkit_core::schema::{InterfaceFamily, OPERATIONS};
use ownerkit_core::{
    sdk, ExceptionKind, OpcodeResolver, OperationSpec, Parcel, ProxyError, RemoteBinder,
    RemoteException, ReplyValue, Result, WireCodec, WireValue,
};
use parking_lot::Mutex;

/// One recorded transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Dispatch code
    pub code: u32,
    /// Request bytes as sent
    pub data: Vec<u8>,
    /// Transaction flags
    pub flags: u32,
}

type Handler = Box<dyn Fn(u32, Parcel) -> Result<Parcel> + Send + Sync>;

/// Remote handle whose replies come from a closure
pub struct ScriptedBinder {
    name: String,
    handler: Handler,
    calls: Mutex<Vec<Transaction>>,
}

impl ScriptedBinder {
    /// Handle answering every transaction with `handler`
    pub fn new<F>(name: impl Into<String>, handler: F) -> Arc<Self>
    where
        F: Fn(u32, Parcel) -> Result<Parcel> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Handle answering every transaction with a fresh `reply()`
    pub fn replying<F>(name: impl Into<String>, reply: F) -> Arc<Self>
    where
        F: Fn() -> Parcel + Send + Sync + 'static,
    {
        Self::new(name, move |_, _| Ok(reply()))
    }

    /// Handle that fails every transaction at the transport level
    pub fn dead(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let message = format!("{name}: DeadObjectException");
        Self::new(name, move |_, _| Err(ProxyError::transaction(message.clone())))
    }

    /// Handle that accepts anything and replies with no exception
    pub fn inert(name: impl Into<String>) -> Arc<Self> {
        Self::replying(name, || {
            let mut reply = Parcel::new();
            reply.write_no_exception();
            reply
        })
    }

    /// Name given at construction
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every transaction received so far
    pub fn calls(&self) -> Vec<Transaction> {
        self.calls.lock().clone()
    }

    /// Dispatch codes received so far
    pub fn call_codes(&self) -> Vec<u32> {
        self.calls.lock().iter().map(|t| t.code).collect()
    }

    /// Number of transactions received
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl RemoteBinder for ScriptedBinder {
    fn transact(&self, code: u32, data: Parcel, flags: u32) -> Result<Parcel> {
        self.calls.lock().push(Transaction {
            code,
            data: data.as_bytes().to_vec(),
            flags,
        });
        (self.handler)(code, data)
    }
}

/// Reply parcel carrying `value` for `spec`
pub fn reply(spec: &OperationSpec, value: ReplyValue) -> Parcel {
    WireCodec::new(sdk::O_MR1)
        .encode_reply(spec, Ok(value))
        .unwrap_or_else(|err| panic!("bad scripted reply for {spec}: {err}"))
}

/// Reply parcel carrying an exception of `kind`
pub fn exception_reply(kind: ExceptionKind, message: &str) -> Parcel {
    let mut parcel = Parcel::new();
    parcel.write_exception(&RemoteException::new(kind, message));
    parcel
}

/// Decodes requests for one interface family by dispatch code and encodes
/// the handler's answer, the way a generated stub would
pub struct StubDispatcher {
    family: InterfaceFamily,
    opcodes: Arc<OpcodeResolver>,
    codec: WireCodec,
}

impl StubDispatcher {
    /// Dispatcher sharing the caller's opcode resolution
    pub fn new(family: InterfaceFamily, opcodes: Arc<OpcodeResolver>, codec: WireCodec) -> Self {
        Self {
            family,
            opcodes,
            codec,
        }
    }

    /// Operation bound to `code`, if any
    pub fn operation(&self, code: u32) -> Option<&'static OperationSpec> {
        OPERATIONS.iter().find(|spec| {
            spec.family == self.family && self.opcodes.resolve_spec(spec).ok() == Some(code)
        })
    }

    /// Decode, run `handler`, encode
    pub fn serve<F>(&self, code: u32, mut data: Parcel, handler: F) -> Result<Parcel>
    where
        F: FnOnce(
            &'static OperationSpec,
            Vec<WireValue>,
        ) -> std::result::Result<ReplyValue, RemoteException>,
    {
        let spec = self.operation(code).ok_or_else(|| {
            ProxyError::transaction(format!("{}: unknown transaction code {code}", self.family))
        })?;
        let args = self.codec.decode_request(spec, &mut data)?;
        self.codec.encode_reply(spec, handler(spec, args))
    }
}

/// `i32` argument at `index`
pub fn arg_i32(args: &[WireValue], index: usize) -> std::result::Result<i32, RemoteException> {
    match args.get(index) {
        Some(WireValue::I32(v)) => Ok(*v),
        other => Err(bad_argument(index, other)),
    }
}

/// String argument at `index`
pub fn arg_str(args: &[WireValue], index: usize) -> std::result::Result<String, RemoteException> {
    match args.get(index) {
        Some(WireValue::Str(Some(v))) => Ok(v.clone()),
        other => Err(bad_argument(index, other)),
    }
}

fn bad_argument(index: usize, found: Option<&WireValue>) -> RemoteException {
    RemoteException::new(
        ExceptionKind::IllegalArgument,
        format!("argument {index}: unexpected {found:?}"),
    )
}
