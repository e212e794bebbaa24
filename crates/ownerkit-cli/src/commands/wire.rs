//! Offline request encoding and reply decoding.

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use ownerkit_core::schema::OperationSpec;
use ownerkit_core::{
    OpcodeResolver, Parcel, ProxyConfig, ProxyError, WireCodec, WireValue, UNRESOLVED_OPCODE,
};

use crate::args::{parse_operation, parse_values};

/// Arguments for `ownerkit encode` and `ownerkit service-call`.
#[derive(Debug, Clone, Args)]
pub struct EncodeArgs {
    /// Operation as `<family>.<name>`, e.g. `device_policy.setApplicationHidden`.
    pub operation: String,

    /// Platform version to encode for (defaults to the configured one).
    #[arg(long)]
    pub sdk: Option<u32>,

    /// Arguments as `<kind>:<value>`, e.g. `s16:com.example.game` or `bool:true`.
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Arguments for `ownerkit decode`.
#[derive(Debug, Clone, Args)]
pub struct DecodeArgs {
    /// Operation the reply belongs to.
    pub operation: String,

    /// Reply parcel bytes as hex.
    pub hex: String,

    /// Platform version the reply came from (defaults to the configured one).
    #[arg(long)]
    pub sdk: Option<u32>,
}

/// Hex dump of the request parcel.
pub fn encode(args: &EncodeArgs, config: &ProxyConfig) -> Result<String> {
    let spec = parse_operation(&args.operation)?;
    let codec = WireCodec::new(args.sdk.unwrap_or(config.default_sdk));
    let parcel = codec.encode_request(spec, parse_values(&args.args)?)?;
    tracing::debug!(%spec, bytes = parcel.data_size(), "encoded request");
    Ok(hex::encode(parcel.as_bytes()))
}

/// Decoded reply value, or the remote exception it carries.
pub fn decode(args: &DecodeArgs, config: &ProxyConfig) -> Result<String> {
    let spec = parse_operation(&args.operation)?;
    let codec = WireCodec::new(args.sdk.unwrap_or(config.default_sdk));
    let bytes = hex::decode(args.hex.trim()).context("reply is not valid hex")?;
    let mut reply = Parcel::from_bytes(bytes);
    match codec.decode_reply(spec, &mut reply) {
        Ok(value) => Ok(format!("{value:?}")),
        Err(ProxyError::Remote(exception)) => Ok(format!("exception: {exception}")),
        Err(err) => Err(err.into()),
    }
}

/// `adb shell service call` line for a device policy operation.
///
/// `service call` writes the interface token itself, so only the fields are
/// rendered. The code comes from the fallback table since there is no
/// dispatch table to introspect offline.
pub fn service_call(args: &EncodeArgs, config: &ProxyConfig) -> Result<String> {
    let spec = parse_operation(&args.operation)?;
    let service = spec
        .family
        .service_name()
        .ok_or_else(|| anyhow!("{} is not registered with the service manager", spec.family))?;
    let sdk_level = args.sdk.unwrap_or(config.default_sdk);
    let code = OpcodeResolver::new(sdk_level)
        .with_source(config.fallback_table())
        .resolve(spec.family, spec.name);
    if code == UNRESOLVED_OPCODE {
        bail!("no dispatch code for {spec} on API {sdk_level}");
    }

    let values = parse_values(&args.args)?;
    check_arity(spec, sdk_level, &values)?;

    let mut line = format!("adb shell service call {service} {code}");
    for value in &values {
        line.push(' ');
        line.push_str(&render(value)?);
    }
    Ok(line)
}

fn check_arity(spec: &OperationSpec, sdk_level: u32, values: &[WireValue]) -> Result<()> {
    let expected: Vec<_> = spec.fields_for(sdk_level).map(|field| field.kind).collect();
    let actual: Vec<_> = values.iter().map(WireValue::kind).collect();
    if expected != actual {
        bail!(
            "{spec} expects ({}) on API {sdk_level}",
            expected
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

fn render(value: &WireValue) -> Result<String> {
    let rendered = match value {
        WireValue::I32(v) => format!("i32 {v}"),
        WireValue::I64(v) => format!("i64 {v}"),
        WireValue::Bool(v) => format!("i32 {}", i32::from(*v)),
        WireValue::Str(None) => "null".to_string(),
        WireValue::Str(Some(text)) => format!("s16 {}", quote(text)),
        WireValue::Component(None) => "i32 0".to_string(),
        WireValue::Component(Some(component)) => format!(
            "i32 1 s16 {} s16 {}",
            quote(&component.package),
            quote(&component.class)
        ),
        other => bail!("{:?} cannot be sent through service call", other.kind()),
    };
    Ok(rendered)
}

fn quote(text: &str) -> String {
    if text.chars().any(char::is_whitespace) {
        format!("'{text}'")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ownerkit_core::schema::device_policy;
    use ownerkit_core::{sdk, ExceptionKind, RemoteException, ReplyValue};

    fn encode_args(operation: &str, sdk: Option<u32>, args: &[&str]) -> EncodeArgs {
        EncodeArgs {
            operation: operation.to_string(),
            sdk,
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    const HIDDEN_ARGS: [&str; 4] = [
        "component:com.rosan.dhizuku/.server.DhizukuDAReceiver",
        "s16:com.rosan.dhizuku",
        "s16:com.example.game",
        "bool:true",
    ];

    #[test]
    fn encoded_request_decodes_on_the_serving_side() {
        let config = ProxyConfig::default();
        let hex_dump = encode(
            &encode_args("device_policy.setApplicationHidden", None, &HIDDEN_ARGS),
            &config,
        )
        .unwrap();

        let codec = WireCodec::new(config.default_sdk);
        let mut parcel = Parcel::from_bytes(hex::decode(hex_dump).unwrap());
        let args = codec
            .decode_request(&device_policy::SET_APPLICATION_HIDDEN, &mut parcel)
            .unwrap();
        assert_eq!(args.len(), 4);
        assert!(matches!(args[3], WireValue::Bool(true)));
        assert!(matches!(&args[2], WireValue::Str(Some(p)) if p == "com.example.game"));
    }

    #[test]
    fn header_grows_with_the_platform_version() {
        let config = ProxyConfig::default();
        let sizes: Vec<usize> = [sdk::O_MR1, sdk::Q, sdk::R]
            .into_iter()
            .map(|level| {
                encode(
                    &encode_args("device_policy.setApplicationHidden", Some(level), &HIDDEN_ARGS),
                    &config,
                )
                .unwrap()
                .len()
                    / 2
            })
            .collect();
        assert_eq!(sizes[1], sizes[0] + 4);
        assert_eq!(sizes[2], sizes[1] + 4);
    }

    #[test]
    fn wrong_arguments_are_rejected() {
        let config = ProxyConfig::default();
        assert!(encode(
            &encode_args("device_policy.setApplicationHidden", None, &HIDDEN_ARGS[..3]),
            &config
        )
        .is_err());
    }

    #[test]
    fn replies_and_exceptions_decode() {
        let config = ProxyConfig::default();
        let codec = WireCodec::new(config.default_sdk);
        let spec = device_policy::IS_APPLICATION_HIDDEN;

        let ok = codec.encode_reply(&spec, Ok(ReplyValue::Bool(true))).unwrap();
        let decoded = decode(
            &DecodeArgs {
                operation: "device_policy.isApplicationHidden".into(),
                hex: hex::encode(ok.as_bytes()),
                sdk: None,
            },
            &config,
        )
        .unwrap();
        assert_eq!(decoded, "Bool(true)");

        let failed = codec
            .encode_reply(
                &spec,
                Err(RemoteException::new(ExceptionKind::Security, "not owner")),
            )
            .unwrap();
        let decoded = decode(
            &DecodeArgs {
                operation: "device_policy.isApplicationHidden".into(),
                hex: hex::encode(failed.as_bytes()),
                sdk: None,
            },
            &config,
        )
        .unwrap();
        assert!(decoded.starts_with("exception:"));
        assert!(decoded.contains("not owner"));

        assert!(decode(
            &DecodeArgs {
                operation: "device_policy.isApplicationHidden".into(),
                hex: "zz".into(),
                sdk: None,
            },
            &config,
        )
        .is_err());
    }

    #[test]
    fn service_call_line_renders_fields() {
        let line = service_call(
            &encode_args("device_policy.setApplicationHidden", None, &HIDDEN_ARGS),
            &ProxyConfig::default(),
        )
        .unwrap();
        assert_eq!(
            line,
            "adb shell service call device_policy 132 \
             i32 1 s16 com.rosan.dhizuku s16 com.rosan.dhizuku.server.DhizukuDAReceiver \
             s16 com.rosan.dhizuku s16 com.example.game i32 1"
        );
    }

    #[test]
    fn service_call_needs_a_registered_service_and_a_code() {
        let config = ProxyConfig::default();
        assert!(service_call(&encode_args("install_service.destroy", None, &[]), &config).is_err());
        assert!(service_call(
            &encode_args("device_policy.setApplicationHidden", Some(sdk::S), &HIDDEN_ARGS),
            &config
        )
        .is_err());
    }
}
