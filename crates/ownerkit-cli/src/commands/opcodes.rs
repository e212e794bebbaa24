//! Dispatch-code listing.

use anyhow::Result;
use clap::Args;
use ownerkit_core::schema::OPERATIONS;
use ownerkit_core::{OpcodeResolver, ProxyConfig};
use serde::Serialize;

/// Arguments for `ownerkit opcodes`.
#[derive(Debug, Clone, Args)]
pub struct OpcodesArgs {
    /// Platform version to resolve for (defaults to the configured one).
    #[arg(long)]
    pub sdk: Option<u32>,

    /// Emit JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// One resolved operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpcodeListing {
    /// Interface family name.
    pub family: String,
    /// Operation name.
    pub operation: &'static str,
    /// Dispatch code, 0 when nothing resolves it.
    pub code: u32,
    /// Source that answered.
    pub source: Option<&'static str>,
}

/// Resolve every known operation offline. Without a device there is no
/// dispatch table to introspect, so only the fallback table answers.
pub fn resolve_all(sdk_level: u32, config: &ProxyConfig) -> Vec<OpcodeListing> {
    let resolver = OpcodeResolver::new(sdk_level).with_source(config.fallback_table());
    OPERATIONS
        .iter()
        .map(|spec| {
            let resolution = resolver.resolve_detailed(spec.family, spec.name);
            OpcodeListing {
                family: spec.family.to_string(),
                operation: spec.name,
                code: resolution.code,
                source: resolution.source,
            }
        })
        .collect()
}

/// Print the listing.
pub fn run(args: &OpcodesArgs, config: &ProxyConfig) -> Result<()> {
    let sdk_level = args.sdk.unwrap_or(config.default_sdk);
    let listing = resolve_all(sdk_level, config);
    tracing::debug!(sdk = sdk_level, operations = listing.len(), "resolved opcode listing");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{:<18} {:<26} {:>5}  source", "family", "operation", "code");
    for row in &listing {
        println!(
            "{:<18} {:<26} {:>5}  {}",
            row.family,
            row.operation,
            row.code,
            row.source.unwrap_or("-")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ownerkit_core::{sdk, InterfaceFamily, OpcodeRow, UNRESOLVED_OPCODE};

    fn code_of(listing: &[OpcodeListing], operation: &str) -> u32 {
        listing
            .iter()
            .find(|row| row.operation == operation)
            .map(|row| row.code)
            .unwrap()
    }

    #[test]
    fn builtin_codes_cover_oreo_mr1() {
        let listing = resolve_all(sdk::O_MR1, &ProxyConfig::default());
        assert_eq!(code_of(&listing, "setApplicationHidden"), 132);
        assert_eq!(code_of(&listing, "getPermissionGrantState"), 213);
        assert_eq!(code_of(&listing, "openWrite"), 4);
        assert_eq!(code_of(&listing, "fsync"), UNRESOLVED_OPCODE);
        assert!(listing
            .iter()
            .filter(|row| row.code == UNRESOLVED_OPCODE)
            .all(|row| row.source.is_none()));
    }

    #[test]
    fn later_versions_only_keep_install_service_codes() {
        let listing = resolve_all(sdk::S, &ProxyConfig::default());
        assert_eq!(code_of(&listing, "setApplicationHidden"), UNRESOLVED_OPCODE);
        assert_eq!(code_of(&listing, "createInstallSession"), 1);
        assert_eq!(code_of(&listing, "destroy"), 5);
    }

    #[test]
    fn overrides_are_listed() {
        let config = ProxyConfig {
            opcode_overrides: vec![OpcodeRow::new(
                InterfaceFamily::InstallerSession,
                "openWrite",
                27,
                Some(27),
                14,
            )],
            ..ProxyConfig::default()
        };
        let listing = resolve_all(sdk::O_MR1, &config);
        assert_eq!(code_of(&listing, "openWrite"), 14);
    }
}
