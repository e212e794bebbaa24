//! Proxy configuration
//!
//! Loaded from TOML, then layered with `OWNERKIT_*` environment variables and
//! validated before use.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ProxyError, Result};
use crate::opcode::{FallbackTable, OpcodeRow, UNRESOLVED_OPCODE};
use crate::schema;
use crate::sdk;

/// Package name of the default delegation broker
pub const DEFAULT_BROKER_PACKAGE: &str = "com.rosan.dhizuku";
/// Default bounded wait for the stream conduit
pub const DEFAULT_STREAM_TIMEOUT_MS: u64 = 30_000;
/// Default copy buffer size
pub const DEFAULT_COPY_CHUNK_BYTES: usize = 65_536;

const MAX_COPY_CHUNK_BYTES: usize = 16 * 1024 * 1024;
const ENV_PREFIX: &str = "OWNERKIT_";

/// How delegated installs reach the installer when no broker-hosted install
/// service is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegatedRoute {
    /// Create, write and commit through the broker-wrapped package installer
    #[default]
    WrappedInstaller,
    /// Create and write through the local installer, commit through the
    /// broker-wrapped session handle
    BrokerCommit,
}

impl std::str::FromStr for DelegatedRoute {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "broker_commit" => Ok(Self::BrokerCommit),
            "wrapped_installer" => Ok(Self::WrappedInstaller),
            other => Err(ProxyError::config(format!("unknown delegated route '{other}'"))),
        }
    }
}

/// Runtime configuration for the proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Package of the delegation broker
    pub broker_package: String,
    /// Bounded wait applied when streaming through a conduit
    pub stream_timeout_ms: u64,
    /// Buffer size for package byte copies
    pub copy_chunk_bytes: usize,
    /// Platform version assumed by offline tooling
    pub default_sdk: u32,
    /// Delegated install route
    pub delegated_route: DelegatedRoute,
    /// Extra fallback opcode rows; these win over built-in rows
    pub opcode_overrides: Vec<OpcodeRow>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            broker_package: DEFAULT_BROKER_PACKAGE.to_string(),
            stream_timeout_ms: DEFAULT_STREAM_TIMEOUT_MS,
            copy_chunk_bytes: DEFAULT_COPY_CHUNK_BYTES,
            default_sdk: sdk::O_MR1,
            delegated_route: DelegatedRoute::default(),
            opcode_overrides: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Merge `OWNERKIT_*` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Merge `OWNERKIT_*` variables from `vars`
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                self.set_from_string(&name.to_lowercase(), &value)?;
            }
        }
        Ok(())
    }

    /// Set one scalar field by name
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = |e: &dyn std::fmt::Display| {
            ProxyError::config(format!("invalid value '{value}' for {key}: {e}"))
        };
        match key {
            "broker_package" => self.broker_package = value.to_string(),
            "stream_timeout_ms" => self.stream_timeout_ms = value.parse().map_err(|e| invalid(&e))?,
            "copy_chunk_bytes" => self.copy_chunk_bytes = value.parse().map_err(|e| invalid(&e))?,
            "default_sdk" => self.default_sdk = value.parse().map_err(|e| invalid(&e))?,
            "delegated_route" => self.delegated_route = value.parse()?,
            other => return Err(ProxyError::config(format!("unknown config key '{other}'"))),
        }
        Ok(())
    }

    /// Layer `other` on top: its non-default scalars win, its overrides append
    pub fn merge_with(&mut self, other: &Self) {
        let defaults = Self::default();
        if other.broker_package != defaults.broker_package {
            self.broker_package.clone_from(&other.broker_package);
        }
        if other.stream_timeout_ms != defaults.stream_timeout_ms {
            self.stream_timeout_ms = other.stream_timeout_ms;
        }
        if other.copy_chunk_bytes != defaults.copy_chunk_bytes {
            self.copy_chunk_bytes = other.copy_chunk_bytes;
        }
        if other.default_sdk != defaults.default_sdk {
            self.default_sdk = other.default_sdk;
        }
        if other.delegated_route != defaults.delegated_route {
            self.delegated_route = other.delegated_route;
        }
        self.opcode_overrides
            .extend(other.opcode_overrides.iter().cloned());
    }

    /// Check ranges and that every override names a known operation
    pub fn validate(&self) -> Result<()> {
        if self.broker_package.trim().is_empty() {
            return Err(ProxyError::config("broker_package must not be empty"));
        }
        if self.stream_timeout_ms == 0 {
            return Err(ProxyError::config("stream_timeout_ms must be positive"));
        }
        if self.copy_chunk_bytes == 0 || self.copy_chunk_bytes > MAX_COPY_CHUNK_BYTES {
            return Err(ProxyError::config(format!(
                "copy_chunk_bytes must be within 1..={MAX_COPY_CHUNK_BYTES}"
            )));
        }
        for row in &self.opcode_overrides {
            validate_row(row)?;
        }
        Ok(())
    }

    /// Bounded conduit wait
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    /// Built-in fallback rows plus configured overrides
    pub fn fallback_table(&self) -> FallbackTable {
        FallbackTable::builtin().with_overrides(self.opcode_overrides.iter().cloned())
    }
}

fn validate_row(row: &OpcodeRow) -> Result<()> {
    let label = format!("{}.{}", row.family, row.operation);
    if schema::lookup(row.family, &row.operation).is_none() {
        return Err(ProxyError::config(format!("override for unknown operation {label}")));
    }
    if row.code == UNRESOLVED_OPCODE {
        return Err(ProxyError::config(format!("override for {label} uses reserved code 0")));
    }
    if let Some(max) = row.max_sdk {
        if max < row.min_sdk {
            return Err(ProxyError::config(format!(
                "override for {label} has max_sdk {max} below min_sdk {}",
                row.min_sdk
            )));
        }
    }
    Ok(())
}
