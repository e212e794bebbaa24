//! Property tests for the reply/request codec.
//!
//! - A reply carrying a matching result decodes to exactly that result
//! - A reply carrying an exception marker never decodes to a result
//! - Requests stay 4-byte aligned whatever the string arguments are

use ownerkit_core::codec::{ReplyValue, WireCodec, WireValue};
use ownerkit_core::errors::{ExceptionKind, ProxyError, RemoteException};
use ownerkit_core::parcel::Parcel;
use ownerkit_core::schema::{device_policy, OPERATIONS};
use ownerkit_core::types::ComponentName;
use proptest::prelude::*;

fn sdk_levels() -> impl Strategy<Value = u32> {
    prop_oneof![Just(27u32), Just(28), Just(29), Just(30), Just(31), Just(34)]
}

fn exception_kinds() -> impl Strategy<Value = ExceptionKind> {
    prop_oneof![
        Just(ExceptionKind::Security),
        Just(ExceptionKind::BadParcelable),
        Just(ExceptionKind::IllegalArgument),
        Just(ExceptionKind::NullPointer),
        Just(ExceptionKind::IllegalState),
        Just(ExceptionKind::NetworkMainThread),
        Just(ExceptionKind::UnsupportedOperation),
        any::<i32>().prop_map(ExceptionKind::ServiceSpecific),
        Just(ExceptionKind::Parcelable),
    ]
}

proptest! {
    #[test]
    fn matching_int_reply_decodes(sdk in sdk_levels(), value in any::<i32>()) {
        let codec = WireCodec::new(sdk);
        let spec = device_policy::GET_PERMISSION_GRANT_STATE;
        let mut reply = codec.encode_reply(&spec, Ok(ReplyValue::I32(value))).unwrap();
        let decoded = codec.decode_reply(&spec, &mut reply).unwrap();
        prop_assert_eq!(decoded.into_i32().unwrap(), value);
    }

    #[test]
    fn matching_bool_reply_decodes(sdk in sdk_levels(), value in any::<bool>()) {
        let codec = WireCodec::new(sdk);
        let spec = device_policy::SET_PERMISSION_GRANT_STATE;
        let mut reply = codec.encode_reply(&spec, Ok(ReplyValue::Bool(value))).unwrap();
        let decoded = codec.decode_reply(&spec, &mut reply).unwrap();
        prop_assert_eq!(decoded.into_bool().unwrap(), value);
    }

    #[test]
    fn exception_marker_always_fails(
        op_index in 0..OPERATIONS.len(),
        kind in exception_kinds(),
        message in proptest::option::of("[a-zA-Z0-9 .:]{0,64}"),
        trailing in any::<i32>(),
    ) {
        let codec = WireCodec::new(27);
        let spec = OPERATIONS[op_index];
        let exception = RemoteException { kind, message: message.clone() };
        let mut reply = codec.encode_reply(&spec, Err(exception)).unwrap();
        // bytes after the exception must never be mistaken for a result
        reply.write_i32(trailing);

        match codec.decode_reply(&spec, &mut reply) {
            Err(ProxyError::Remote(decoded)) => {
                prop_assert_eq!(decoded.kind, kind);
                prop_assert_eq!(decoded.message, message);
            }
            other => prop_assert!(false, "expected remote exception, got {:?}", other),
        }
    }

    #[test]
    fn requests_are_word_aligned(
        sdk in sdk_levels(),
        caller in "\\PC{0,40}",
        package in "\\PC{0,40}",
        hidden in any::<bool>(),
    ) {
        let codec = WireCodec::new(sdk);
        let args = vec![
            WireValue::Component(Some(ComponentName::new(caller.clone(), "Admin"))),
            WireValue::Str(Some(caller.clone())),
            WireValue::Str(Some(package.clone())),
            WireValue::Bool(hidden),
        ];
        let mut request = codec.encode_request(&device_policy::SET_APPLICATION_HIDDEN, args).unwrap();
        prop_assert_eq!(request.data_size() % 4, 0);

        let decoded = codec.decode_request(&device_policy::SET_APPLICATION_HIDDEN, &mut request).unwrap();
        prop_assert!(matches!(&decoded[2], WireValue::Str(Some(p)) if *p == package));
        prop_assert!(matches!(decoded[3], WireValue::Bool(h) if h == hidden));
    }

    #[test]
    fn truncated_replies_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let codec = WireCodec::new(30);
        let mut reply = Parcel::from_bytes(bytes);
        let _ = codec.decode_reply(&device_policy::IS_APPLICATION_HIDDEN, &mut reply);
    }
}
