//! Dispatch code resolution
//!
//! Codes come from a chain of [`OpcodeSource`]s consulted in order: dispatch
//! table introspection first, then the static fallback table. No source ever
//! fails loudly; when every source comes up empty the resolver returns
//! [`UNRESOLVED_OPCODE`] and callers refuse to transact.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::effects::DispatchTableEffects;
use crate::errors::{ProxyError, Result};
use crate::schema::{InterfaceFamily, OperationSpec};
use crate::sdk;

/// Sentinel meaning "operation rejected"
pub const UNRESOLVED_OPCODE: u32 = 0;

/// One strategy for finding a dispatch code
pub trait OpcodeSource: Send + Sync {
    /// Short name, for logs
    fn name(&self) -> &'static str;

    /// Code for `operation` on `sdk_level`, if this source knows it
    fn lookup(&self, family: InterfaceFamily, operation: &str, sdk_level: u32) -> Option<u32>;
}

/// Reads `TRANSACTION_<operation>` from the generated stub class
pub struct IntrospectionSource {
    dispatch_table: Arc<dyn DispatchTableEffects>,
}

impl IntrospectionSource {
    /// Create an introspection source
    pub fn new(dispatch_table: Arc<dyn DispatchTableEffects>) -> Self {
        Self { dispatch_table }
    }
}

impl OpcodeSource for IntrospectionSource {
    fn name(&self) -> &'static str {
        "introspection"
    }

    fn lookup(&self, family: InterfaceFamily, operation: &str, _sdk_level: u32) -> Option<u32> {
        let stub = family.stub_class()?;
        self.dispatch_table
            .transaction_code(&stub, &format!("TRANSACTION_{operation}"))
            .filter(|code| *code != UNRESOLVED_OPCODE)
    }
}

/// One row of the fallback table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeRow {
    /// Interface family
    pub family: InterfaceFamily,
    /// Operation name
    pub operation: String,
    /// First platform version the code is valid for
    pub min_sdk: u32,
    /// Last platform version the code is valid for, open-ended when absent
    #[serde(default)]
    pub max_sdk: Option<u32>,
    /// Dispatch code
    pub code: u32,
}

impl OpcodeRow {
    /// Create a row
    pub fn new(
        family: InterfaceFamily,
        operation: impl Into<String>,
        min_sdk: u32,
        max_sdk: Option<u32>,
        code: u32,
    ) -> Self {
        Self {
            family,
            operation: operation.into(),
            min_sdk,
            max_sdk,
            code,
        }
    }

    fn matches(&self, family: InterfaceFamily, operation: &str, sdk_level: u32) -> bool {
        self.family == family
            && self.operation == operation
            && self.min_sdk <= sdk_level
            && self.max_sdk.map_or(true, |max| sdk_level <= max)
    }
}

/// Static dispatch codes keyed by family, operation and version range
///
/// Later rows take precedence, so configured overrides appended after the
/// built-in rows win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackTable {
    rows: Vec<OpcodeRow>,
}

impl FallbackTable {
    /// Empty table
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in rows
    ///
    /// Platform codes are only known for API 27. The broker-hosted install
    /// service defines its own codes, valid everywhere.
    ///
    /// The API 27 `openWrite` code follows the declaration order of
    /// `IPackageInstallerSession` and is unverified on devices. That release
    /// has no remote `fsync`, so it gets no row.
    pub fn builtin() -> Self {
        use InterfaceFamily::*;
        let o_mr1 = |family, operation: &str, code| {
            OpcodeRow::new(family, operation, sdk::O_MR1, Some(sdk::O_MR1), code)
        };
        let any = |operation: &str, code| OpcodeRow::new(InstallService, operation, 0, None, code);

        Self {
            rows: vec![
                o_mr1(DevicePolicy, "setApplicationHidden", 132),
                o_mr1(DevicePolicy, "isApplicationHidden", 133),
                o_mr1(DevicePolicy, "setPermissionGrantState", 212),
                o_mr1(DevicePolicy, "getPermissionGrantState", 213),
                o_mr1(PackageInstaller, "createSession", 1),
                o_mr1(PackageInstaller, "openSession", 3),
                o_mr1(PackageInstaller, "abandonSession", 5),
                o_mr1(InstallerSession, "openWrite", 4),
                o_mr1(InstallerSession, "commit", 1),
                any("createInstallSession", 1),
                any("writeToSession", 2),
                any("commitSession", 3),
                any("abandonSession", 4),
                any("destroy", 5),
            ],
        }
    }

    /// Append rows that take precedence over existing ones
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = OpcodeRow>) -> Self {
        self.rows.extend(overrides);
        self
    }

    /// All rows, in precedence order (lowest first)
    pub fn rows(&self) -> &[OpcodeRow] {
        &self.rows
    }
}

impl OpcodeSource for FallbackTable {
    fn name(&self) -> &'static str {
        "fallback-table"
    }

    fn lookup(&self, family: InterfaceFamily, operation: &str, sdk_level: u32) -> Option<u32> {
        self.rows
            .iter()
            .rev()
            .find(|row| row.matches(family, operation, sdk_level))
            .map(|row| row.code)
            .filter(|code| *code != UNRESOLVED_OPCODE)
    }
}

/// Resolution result, including which source answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Dispatch code, [`UNRESOLVED_OPCODE`] when rejected
    pub code: u32,
    /// Name of the answering source
    pub source: Option<&'static str>,
}

/// Ordered chain of opcode sources for one platform version
pub struct OpcodeResolver {
    sources: Vec<Box<dyn OpcodeSource>>,
    sdk_level: u32,
}

impl OpcodeResolver {
    /// Resolver with no sources; everything resolves to the sentinel
    pub fn new(sdk_level: u32) -> Self {
        Self {
            sources: Vec::new(),
            sdk_level,
        }
    }

    /// Introspection first, then `table`
    pub fn standard(
        dispatch_table: Arc<dyn DispatchTableEffects>,
        table: FallbackTable,
        sdk_level: u32,
    ) -> Self {
        Self::new(sdk_level)
            .with_source(IntrospectionSource::new(dispatch_table))
            .with_source(table)
    }

    /// Append a source to the chain
    pub fn with_source(mut self, source: impl OpcodeSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Platform version being resolved for
    pub fn sdk_level(&self) -> u32 {
        self.sdk_level
    }

    /// Resolve with provenance
    pub fn resolve_detailed(&self, family: InterfaceFamily, operation: &str) -> Resolution {
        for source in &self.sources {
            if let Some(code) = source.lookup(family, operation, self.sdk_level) {
                tracing::debug!(%family, operation, code, source = source.name(), "resolved opcode");
                return Resolution {
                    code,
                    source: Some(source.name()),
                };
            }
        }
        tracing::debug!(%family, operation, sdk = self.sdk_level, "no opcode source matched");
        Resolution {
            code: UNRESOLVED_OPCODE,
            source: None,
        }
    }

    /// Dispatch code for `operation`, or [`UNRESOLVED_OPCODE`]
    pub fn resolve(&self, family: InterfaceFamily, operation: &str) -> u32 {
        self.resolve_detailed(family, operation).code
    }

    /// Dispatch code for `spec`; the sentinel becomes
    /// [`ProxyError::OperationRejected`]
    pub fn resolve_spec(&self, spec: &OperationSpec) -> Result<u32> {
        match self.resolve(spec.family, spec.name) {
            UNRESOLVED_OPCODE => Err(ProxyError::rejected(spec.family, spec.name)),
            code => Ok(code),
        }
    }
}
