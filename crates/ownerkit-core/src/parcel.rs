//! Binder parcel buffer
//!
//! A [`Parcel`] is a little-endian byte buffer with 4-byte alignment plus a
//! side table of live objects (binder handles and file descriptors). Objects
//! appear in the byte stream as flat objects whose slot field indexes the
//! side table, so a parcel can be hex dumped and still carry live handles.
//!
//! Writes always append; reads advance a cursor that starts at zero.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::effects::RemoteBinder;
use crate::errors::{ExceptionKind, ProxyError, RemoteException, Result};
use crate::sdk;

/// Flat object type tag for a binder reference
pub const BINDER_TYPE_BINDER: u32 = 0x7362_2a85;
/// Flat object type tag for a file descriptor
pub const BINDER_TYPE_FD: u32 = 0x6664_2a85;
/// Reply marker announcing a header that precedes the real exception code
pub const EX_HAS_REPLY_HEADER: i32 = -128;

// priority mask plus accepts-fds
const FLAT_OBJECT_FLAGS: u32 = 0x17f;
// StrictMode PENALTY_GATHER bit
const STRICT_MODE_PENALTY_GATHER: i32 = i32::MIN;
const WORK_SOURCE_UNSET: i32 = -1;
// 'S' 'Y' 'S' 'T'
const SYSTEM_HEADER: i32 = 0x5359_5354;

/// Objects that can be serialized into a parcel as a nested structure
pub trait Parcelable: Sized {
    /// Append this value's fields
    fn write_to_parcel(&self, parcel: &mut Parcel);
    /// Read a value at the current cursor
    fn read_from_parcel(parcel: &mut Parcel) -> Result<Self>;
}

/// A file descriptor travelling inside a parcel, modelled by its stream end
pub enum ParcelFd {
    /// Read end; the receiver pulls bytes from it
    Reader(Box<dyn Read + Send>),
    /// Write end; the receiver pushes bytes into it
    Writer(Box<dyn Write + Send>),
}

impl ParcelFd {
    /// Unwrap the write end
    pub fn into_writer(self) -> Result<Box<dyn Write + Send>> {
        match self {
            Self::Writer(writer) => Ok(writer),
            Self::Reader(_) => Err(ProxyError::codec("expected a writable descriptor")),
        }
    }

    /// Unwrap the read end
    pub fn into_reader(self) -> Result<Box<dyn Read + Send>> {
        match self {
            Self::Reader(reader) => Ok(reader),
            Self::Writer(_) => Err(ProxyError::codec("expected a readable descriptor")),
        }
    }
}

impl fmt::Debug for ParcelFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reader(_) => write!(f, "ParcelFd::Reader"),
            Self::Writer(_) => write!(f, "ParcelFd::Writer"),
        }
    }
}

enum ParcelObject {
    Binder(Arc<dyn RemoteBinder>),
    Fd(Option<ParcelFd>),
}

/// Request or reply buffer for a binder transaction
#[derive(Default)]
pub struct Parcel {
    data: Vec<u8>,
    position: usize,
    objects: Vec<ParcelObject>,
}

impl fmt::Debug for Parcel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parcel")
            .field("data_size", &self.data.len())
            .field("position", &self.position)
            .field("objects", &self.objects.len())
            .finish()
    }
}

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

impl Parcel {
    /// Create an empty parcel
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap raw bytes (no live objects) for reading
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            objects: Vec::new(),
        }
    }

    /// Raw byte contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of data bytes
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Read cursor
    pub fn data_position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    pub fn data_avail(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the read cursor
    pub fn set_data_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Number of live objects in the side table
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn pad(&mut self) {
        let padded = align4(self.data.len());
        self.data.resize(padded, 0);
    }

    /// Append an i32
    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a u32
    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append an i64
    pub fn write_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a u64
    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a boolean as an i32
    pub fn write_bool(&mut self, value: bool) {
        self.write_i32(i32::from(value));
    }

    /// Append a length-prefixed UTF-16 string, `None` as length -1
    pub fn write_string16(&mut self, value: Option<&str>) {
        let Some(value) = value else {
            self.write_i32(-1);
            return;
        };
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_i32(units.len() as i32);
        for unit in units {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.extend_from_slice(&0u16.to_le_bytes());
        self.pad();
    }

    /// Append a nested parcelable behind a nullability marker
    pub fn write_nullable<P: Parcelable>(&mut self, value: Option<&P>) {
        match value {
            Some(value) => {
                self.write_i32(1);
                value.write_to_parcel(self);
            }
            None => self.write_i32(0),
        }
    }

    /// Append the interface token header for `descriptor`
    ///
    /// The header layout depends on the platform version: the work-source
    /// uid appears from API 29 and the system header marker from API 30.
    pub fn write_interface_token(&mut self, descriptor: &str, sdk_level: u32) {
        self.write_i32(STRICT_MODE_PENALTY_GATHER);
        if sdk_level >= sdk::Q {
            self.write_i32(WORK_SOURCE_UNSET);
        }
        if sdk_level >= sdk::R {
            self.write_i32(SYSTEM_HEADER);
        }
        self.write_string16(Some(descriptor));
    }

    fn write_flat_object(&mut self, kind: u32, slot: u64) {
        self.write_u32(kind);
        self.write_u32(FLAT_OBJECT_FLAGS);
        self.write_u64(slot);
        self.write_u64(0);
    }

    /// Append a binder reference, `None` as a null binder
    pub fn write_strong_binder(&mut self, binder: Option<Arc<dyn RemoteBinder>>) {
        match binder {
            Some(binder) => {
                self.objects.push(ParcelObject::Binder(binder));
                let slot = self.objects.len() as u64;
                self.write_flat_object(BINDER_TYPE_BINDER, slot);
            }
            None => self.write_flat_object(BINDER_TYPE_BINDER, 0),
        }
    }

    /// Append a raw file descriptor object
    pub fn write_file_descriptor(&mut self, fd: ParcelFd) {
        self.objects.push(ParcelObject::Fd(Some(fd)));
        let slot = self.objects.len() as u64;
        self.write_flat_object(BINDER_TYPE_FD, slot);
    }

    /// Append a `ParcelFileDescriptor` (no comm channel)
    pub fn write_parcel_file_descriptor(&mut self, fd: ParcelFd) {
        self.write_i32(0);
        self.write_file_descriptor(fd);
    }

    /// Append the "no exception" reply marker
    pub fn write_no_exception(&mut self) {
        self.write_i32(0);
    }

    /// Append an exception reply marker with message and empty stack trace
    pub fn write_exception(&mut self, exception: &RemoteException) {
        self.write_i32(exception.kind.code());
        self.write_string16(exception.message.as_deref());
        self.write_i32(0);
        if let ExceptionKind::ServiceSpecific(code) = exception.kind {
            self.write_i32(code);
        }
    }

    fn read_padded(&mut self, len: usize, what: &str) -> Result<&[u8]> {
        let start = self.position;
        let padded = align4(len);
        if start + padded > self.data.len() {
            return Err(ProxyError::codec(format!(
                "parcel underflow reading {what} at offset {start} (need {padded}, have {})",
                self.data.len().saturating_sub(start)
            )));
        }
        self.position = start + padded;
        Ok(&self.data[start..start + len])
    }

    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let bytes = self.read_padded(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read an i32
    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_array::<4>("i32").map(i32::from_le_bytes)
    }

    /// Read a u32
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array::<4>("u32").map(u32::from_le_bytes)
    }

    /// Read an i64
    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_array::<8>("i64").map(i64::from_le_bytes)
    }

    /// Read a u64
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_array::<8>("u64").map(u64::from_le_bytes)
    }

    /// Read an i32 boolean (any non-zero value is true)
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_i32()? != 0)
    }

    /// Read a length-prefixed UTF-16 string
    pub fn read_string16(&mut self) -> Result<Option<String>> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| ProxyError::codec(format!("invalid string16 length {len}")))?;
        let bytes = self.read_padded((len + 1) * 2, "string16")?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .take(len)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map(Some)
            .map_err(|e| ProxyError::codec(format!("invalid UTF-16: {e}")))
    }

    /// Read a nested parcelable behind a nullability marker
    pub fn read_nullable<P: Parcelable>(&mut self) -> Result<Option<P>> {
        match self.read_i32()? {
            0 => Ok(None),
            _ => P::read_from_parcel(self).map(Some),
        }
    }

    /// Consume an interface token header and check its descriptor
    pub fn enforce_interface(&mut self, descriptor: &str, sdk_level: u32) -> Result<()> {
        let _strict_mode = self.read_i32()?;
        if sdk_level >= sdk::Q {
            let _work_source = self.read_i32()?;
        }
        if sdk_level >= sdk::R {
            let header = self.read_i32()?;
            if header != SYSTEM_HEADER {
                return Err(ProxyError::codec(format!(
                    "bad interface token header {header:#x}"
                )));
            }
        }
        match self.read_string16()? {
            Some(found) if found == descriptor => Ok(()),
            found => Err(ProxyError::codec(format!(
                "interface token mismatch: expected {descriptor}, found {}",
                found.as_deref().unwrap_or("null")
            ))),
        }
    }

    fn read_flat_object(&mut self, expected: u32) -> Result<u64> {
        let kind = self.read_u32()?;
        if kind != expected {
            return Err(ProxyError::codec(format!(
                "expected flat object {expected:#x}, found {kind:#x}"
            )));
        }
        let _flags = self.read_u32()?;
        let slot = self.read_u64()?;
        let _cookie = self.read_u64()?;
        Ok(slot)
    }

    fn object_index(&self, slot: u64) -> Result<usize> {
        let index = usize::try_from(slot)
            .ok()
            .and_then(|slot| slot.checked_sub(1))
            .filter(|index| *index < self.objects.len());
        index.ok_or_else(|| {
            ProxyError::codec(format!("object slot {slot} has no backing object"))
        })
    }

    /// Read a binder reference
    pub fn read_strong_binder(&mut self) -> Result<Option<Arc<dyn RemoteBinder>>> {
        let slot = self.read_flat_object(BINDER_TYPE_BINDER)?;
        if slot == 0 {
            return Ok(None);
        }
        let index = self.object_index(slot)?;
        match &self.objects[index] {
            ParcelObject::Binder(binder) => Ok(Some(Arc::clone(binder))),
            ParcelObject::Fd(_) => Err(ProxyError::codec(format!(
                "object slot {slot} holds a descriptor, not a binder"
            ))),
        }
    }

    /// Read a raw file descriptor object, taking ownership of it
    pub fn read_file_descriptor(&mut self) -> Result<ParcelFd> {
        let slot = self.read_flat_object(BINDER_TYPE_FD)?;
        let index = self.object_index(slot)?;
        match &mut self.objects[index] {
            ParcelObject::Fd(fd) => fd
                .take()
                .ok_or_else(|| ProxyError::codec(format!("descriptor slot {slot} already taken"))),
            ParcelObject::Binder(_) => Err(ProxyError::codec(format!(
                "object slot {slot} holds a binder, not a descriptor"
            ))),
        }
    }

    /// Read a `ParcelFileDescriptor`
    pub fn read_parcel_file_descriptor(&mut self) -> Result<ParcelFd> {
        if self.read_i32()? != 0 {
            return Err(ProxyError::codec(
                "descriptors with a comm channel are not supported",
            ));
        }
        self.read_file_descriptor()
    }

    /// Read the reply exception marker
    ///
    /// Returns `None` when the call succeeded and the cursor is positioned at
    /// the result. A reply header (-128) is skipped and counts as success.
    pub fn read_exception(&mut self) -> Result<Option<RemoteException>> {
        let code = self.read_i32()?;
        if code == EX_HAS_REPLY_HEADER {
            let header_start = self.position;
            let header_size = self.read_i32()?;
            if header_size > 0 {
                self.seek(header_start + header_size as usize)?;
            }
            return Ok(None);
        }
        if code == 0 {
            return Ok(None);
        }

        let message = self.read_string16()?;
        let trace_start = self.position;
        let trace_size = self.read_i32()?;
        if trace_size > 0 {
            self.seek(trace_start + trace_size as usize)?;
        }
        let service_code = if code == ExceptionKind::ServiceSpecific(0).code() {
            self.read_i32()?
        } else {
            0
        };
        Ok(Some(RemoteException {
            kind: ExceptionKind::from_code(code, service_code),
            message,
        }))
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(ProxyError::codec(format!(
                "header skips past end of parcel ({position} > {})",
                self.data.len()
            )));
        }
        self.position = position;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct NullBinder;

    impl RemoteBinder for NullBinder {
        fn transact(&self, _code: u32, _data: Parcel, _flags: u32) -> Result<Parcel> {
            Ok(Parcel::new())
        }
    }

    #[test]
    fn string16_is_null_terminated_and_padded() {
        let mut parcel = Parcel::new();
        parcel.write_string16(Some("ab"));
        // len + 2 chars + terminator, padded to 12
        assert_eq!(
            parcel.as_bytes(),
            &[2, 0, 0, 0, b'a', 0, b'b', 0, 0, 0, 0, 0]
        );

        parcel.write_string16(None);
        parcel.write_string16(Some("é"));
        assert_eq!(parcel.read_string16().ok(), Some(Some("ab".to_string())));
        assert_eq!(parcel.read_string16().ok(), Some(None));
        assert_eq!(parcel.read_string16().ok(), Some(Some("é".to_string())));
        assert_eq!(parcel.data_avail(), 0);
    }

    #[test]
    fn interface_token_grows_with_platform_version() {
        let descriptor = "android.app.admin.IDevicePolicyManager";
        let sizes: Vec<usize> = [27, 29, 30]
            .iter()
            .map(|sdk_level| {
                let mut parcel = Parcel::new();
                parcel.write_interface_token(descriptor, *sdk_level);
                parcel.data_size()
            })
            .collect();
        assert_eq!(sizes[1], sizes[0] + 4);
        assert_eq!(sizes[2], sizes[0] + 8);

        for sdk_level in [27, 29, 30, 34] {
            let mut parcel = Parcel::new();
            parcel.write_interface_token(descriptor, sdk_level);
            assert!(parcel.enforce_interface(descriptor, sdk_level).is_ok());
        }
    }

    #[test]
    fn enforce_interface_rejects_wrong_descriptor() {
        let mut parcel = Parcel::new();
        parcel.write_interface_token("android.content.pm.IPackageInstaller", 27);
        let err = parcel.enforce_interface("android.app.admin.IDevicePolicyManager", 27);
        assert!(matches!(err, Err(ProxyError::Codec { .. })));
    }

    #[test]
    fn reads_past_end_fail() {
        let mut parcel = Parcel::from_bytes(vec![1, 0]);
        assert!(parcel.read_i32().is_err());
    }

    #[test]
    fn exception_marker_round_trip() {
        let mut parcel = Parcel::new();
        parcel.write_exception(&RemoteException::new(
            ExceptionKind::ServiceSpecific(7),
            "quota",
        ));
        parcel.write_i32(99);
        let exception = parcel.read_exception().ok().flatten();
        assert_eq!(
            exception.map(|e| e.kind),
            Some(ExceptionKind::ServiceSpecific(7))
        );
        assert_eq!(parcel.read_i32().ok(), Some(99));
    }

    #[test]
    fn reply_header_is_skipped() {
        let mut parcel = Parcel::new();
        parcel.write_i32(EX_HAS_REPLY_HEADER);
        parcel.write_i32(12);
        parcel.write_i32(0x1111);
        parcel.write_i32(0x2222);
        parcel.write_i32(5);
        assert!(matches!(parcel.read_exception(), Ok(None)));
        assert_eq!(parcel.read_i32().ok(), Some(5));
    }

    #[test]
    fn objects_travel_in_side_table() {
        let mut parcel = Parcel::new();
        parcel.write_strong_binder(Some(Arc::new(NullBinder)));
        parcel.write_strong_binder(None);
        parcel.write_parcel_file_descriptor(ParcelFd::Reader(Box::new(Cursor::new(vec![1u8]))));
        assert_eq!(parcel.object_count(), 2);
        assert_eq!(parcel.data_size(), 24 * 3 + 4);

        assert!(matches!(parcel.read_strong_binder(), Ok(Some(_))));
        assert!(matches!(parcel.read_strong_binder(), Ok(None)));
        let fd = parcel.read_parcel_file_descriptor();
        assert!(matches!(fd, Ok(ParcelFd::Reader(_))));

        parcel.set_data_position(48);
        assert!(parcel.read_parcel_file_descriptor().is_err());
    }

    #[test]
    fn dangling_object_slot_is_a_codec_error() {
        let mut source = Parcel::new();
        source.write_strong_binder(Some(Arc::new(NullBinder)));
        let mut copy = Parcel::from_bytes(source.as_bytes().to_vec());
        assert!(matches!(copy.read_strong_binder(), Err(ProxyError::Codec { .. })));
    }
}
