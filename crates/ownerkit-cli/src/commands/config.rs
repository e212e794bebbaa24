//! Configuration loading and checking.

use std::path::Path;

use anyhow::{Context, Result};
use ownerkit_core::ProxyConfig;

/// Defaults, then the file if given, then `OWNERKIT_*` variables.
pub fn load(path: Option<&Path>) -> Result<ProxyConfig> {
    let mut config = match path {
        Some(path) => ProxyConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProxyConfig::default(),
    };
    config.merge_with_env()?;
    config.validate()?;
    tracing::debug!(
        broker = %config.broker_package,
        sdk = config.default_sdk,
        overrides = config.opcode_overrides.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Effective configuration for `path`, rendered back as TOML.
pub fn check(path: &Path) -> Result<String> {
    let config = load(Some(path))?;
    toml::to_string_pretty(&config).context("rendering configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ownerkit_core::DelegatedRoute;
    use std::io::Write;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn file_values_are_layered_over_defaults() {
        let file = config_file(
            r#"
delegated_route = "broker_commit"

[[opcode_overrides]]
family = "installer_session"
operation = "openWrite"
min_sdk = 28
max_sdk = 28
code = 4
"#,
        );
        let config = ProxyConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.delegated_route, DelegatedRoute::BrokerCommit);
        assert_eq!(config.opcode_overrides.len(), 1);
        assert_eq!(config.broker_package, ProxyConfig::default().broker_package);

        let rendered = check(file.path()).unwrap();
        assert!(rendered.contains("broker_commit"));
        assert!(rendered.contains("openWrite"));
    }

    #[test]
    fn invalid_files_are_reported() {
        let reserved = config_file(
            r#"
[[opcode_overrides]]
family = "device_policy"
operation = "setApplicationHidden"
min_sdk = 27
code = 0
"#,
        );
        assert!(check(reserved.path()).is_err());

        let malformed = config_file("copy_chunk_bytes = \"lots\"");
        assert!(check(malformed.path()).is_err());

        assert!(check(Path::new("/nonexistent/ownerkit.toml")).is_err());
    }
}
