//! Command-line argument parsing for wire values and operation names

use anyhow::{anyhow, bail, Context, Result};
use ownerkit_core::schema::{self, InterfaceFamily, OperationSpec};
use ownerkit_core::{ComponentName, SessionParams, WireValue};

/// Resolve `family.operation`
pub fn parse_operation(name: &str) -> Result<&'static OperationSpec> {
    let (family, operation) = name
        .split_once('.')
        .ok_or_else(|| anyhow!("expected <family>.<operation>, got '{name}'"))?;
    let family: InterfaceFamily = family.parse()?;
    schema::lookup(family, operation)
        .ok_or_else(|| anyhow!("unknown operation '{operation}' in {family}"))
}

/// Parse one `kind:value` argument
///
/// Kinds: `i32`, `i64`, `bool`, `s16`, `component` (`pkg/cls`), `params`
/// (`full`), `receiver` and `fd`. Every nullable kind accepts `null`; status
/// receivers and descriptors only accept `null` offline.
pub fn parse_value(raw: &str) -> Result<WireValue> {
    let (kind, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected <kind>:<value>, got '{raw}'"))?;
    let null = value == "null";
    let parsed = match kind {
        "i32" => WireValue::I32(value.parse().with_context(|| format!("bad i32 '{value}'"))?),
        "i64" => WireValue::I64(value.parse().with_context(|| format!("bad i64 '{value}'"))?),
        "bool" => WireValue::Bool(match value {
            "true" | "1" => true,
            "false" | "0" => false,
            other => bail!("bad bool '{other}'"),
        }),
        "s16" if null => WireValue::Str(None),
        "s16" => WireValue::str(value),
        "component" if null => WireValue::Component(None),
        "component" => WireValue::Component(Some(
            ComponentName::unflatten(value)
                .ok_or_else(|| anyhow!("bad component '{value}', expected pkg/cls"))?,
        )),
        "params" if null => WireValue::SessionParams(None),
        "params" if value == "full" => WireValue::SessionParams(Some(SessionParams::full_install())),
        "receiver" if null => WireValue::StatusReceiver(None),
        "fd" if null => WireValue::Fd(None),
        other => bail!("unsupported argument '{other}:{value}'"),
    };
    Ok(parsed)
}

/// Parse every argument in order
pub fn parse_values(raw: &[String]) -> Result<Vec<WireValue>> {
    raw.iter().map(|arg| parse_value(arg)).collect()
}
