//! Shared domain types: authority modes, component identities, grant
//! states, install session lifecycle and install outcomes.

use std::fmt;

use crate::errors::{ProxyError, Result};
use crate::parcel::{Parcel, Parcelable};

/// Which authority path privileged operations go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorityMode {
    /// No usable authority; privileged operations fail fast
    None,
    /// The running package is device owner and calls the platform directly
    Direct,
    /// A delegation broker holds the authority and wraps remote handles
    Delegated,
}

impl AuthorityMode {
    /// True for any mode other than [`AuthorityMode::None`]
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for AuthorityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Direct => write!(f, "direct"),
            Self::Delegated => write!(f, "delegated"),
        }
    }
}

/// Identity of an application component (package plus class)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentName {
    /// Owning package
    pub package: String,
    /// Fully qualified class name
    pub class: String,
}

impl ComponentName {
    /// Create a component name
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    /// Parse `pkg/cls` or `pkg/.RelativeCls`
    pub fn unflatten(flat: &str) -> Option<Self> {
        let (package, class) = flat.split_once('/')?;
        if package.is_empty() || class.is_empty() {
            return None;
        }
        let class = if class.starts_with('.') {
            format!("{package}{class}")
        } else {
            class.to_string()
        };
        Some(Self::new(package, class))
    }

    /// Short form, abbreviating classes inside the package as `.Cls`
    pub fn flatten_to_short_string(&self) -> String {
        match self.class.strip_prefix(&self.package) {
            Some(rest) if rest.starts_with('.') => format!("{}/{rest}", self.package),
            _ => format!("{}/{}", self.package, self.class),
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flatten_to_short_string())
    }
}

impl Parcelable for ComponentName {
    fn write_to_parcel(&self, parcel: &mut Parcel) {
        parcel.write_string16(Some(&self.package));
        parcel.write_string16(Some(&self.class));
    }

    fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        let package = parcel
            .read_string16()?
            .ok_or_else(|| ProxyError::codec("component package is null"))?;
        let class = parcel
            .read_string16()?
            .ok_or_else(|| ProxyError::codec("component class is null"))?;
        Ok(Self { package, class })
    }
}

/// Runtime permission grant policy for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GrantState {
    /// The user decides (0)
    #[default]
    Default,
    /// Always granted (1)
    Granted,
    /// Always denied (2)
    Denied,
}

impl GrantState {
    /// Decode a wire grant state
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Default),
            1 => Some(Self::Granted),
            2 => Some(Self::Denied),
            _ => None,
        }
    }

    /// Wire value of this state
    pub fn code(&self) -> i32 {
        match self {
            Self::Default => 0,
            Self::Granted => 1,
            Self::Denied => 2,
        }
    }
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Lifecycle state of an install session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Allocated by the installer, nothing written yet
    Created,
    /// At least one entry has been streamed
    Writing,
    /// Submitted to the installer (not necessarily installed)
    Committed,
    /// Discarded
    Abandoned,
}

impl SessionState {
    /// Committed and abandoned sessions accept no further steps
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Abandoned)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Writing => write!(f, "writing"),
            Self::Committed => write!(f, "committed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Facts about the running host package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// Package name of the running application
    pub package_name: String,
    /// The application's own device admin receiver
    pub admin_component: ComponentName,
    /// Platform API level
    pub sdk_level: u32,
}

impl HostContext {
    /// Create a host context
    pub fn new(
        package_name: impl Into<String>,
        admin_component: ComponentName,
        sdk_level: u32,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            admin_component,
            sdk_level,
        }
    }
}

/// Installer session mode: replace the whole package
pub const MODE_FULL_INSTALL: i32 = 1;
/// Install location: internal storage only
pub const INSTALL_LOCATION_INTERNAL_ONLY: i32 = 1;
/// Install reason: unknown
pub const INSTALL_REASON_UNKNOWN: i32 = 0;
/// Uid placeholder for an unknown originator
pub const UID_UNKNOWN: i32 = -1;

/// Parameters used to create an install session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Session mode
    pub mode: i32,
    /// Installer flags
    pub install_flags: i32,
    /// Preferred install location
    pub install_location: i32,
    /// Reason code
    pub install_reason: i32,
    /// Total size hint, -1 when unknown
    pub size_bytes: i64,
    /// Package being installed, if known up front
    pub app_package_name: Option<String>,
    /// Label shown during confirmation
    pub app_label: Option<String>,
    /// Uid the install originated from
    pub originating_uid: i32,
    /// ABI override
    pub abi_override: Option<String>,
    /// Target volume
    pub volume_uuid: Option<String>,
}

impl SessionParams {
    /// Parameters for a full install with platform defaults
    pub fn full_install() -> Self {
        Self {
            mode: MODE_FULL_INSTALL,
            install_flags: 0,
            install_location: INSTALL_LOCATION_INTERNAL_ONLY,
            install_reason: INSTALL_REASON_UNKNOWN,
            size_bytes: -1,
            app_package_name: None,
            app_label: None,
            originating_uid: UID_UNKNOWN,
            abi_override: None,
            volume_uuid: None,
        }
    }
}

impl Default for SessionParams {
    fn default() -> Self {
        Self::full_install()
    }
}

// Icon, origin and referrer are never set by this proxy; they travel as null
// parcelables and the granted-permission list as a null string array.
impl Parcelable for SessionParams {
    fn write_to_parcel(&self, parcel: &mut Parcel) {
        parcel.write_i32(self.mode);
        parcel.write_i32(self.install_flags);
        parcel.write_i32(self.install_location);
        parcel.write_i32(self.install_reason);
        parcel.write_i64(self.size_bytes);
        parcel.write_string16(self.app_package_name.as_deref());
        parcel.write_string16(None);
        parcel.write_string16(self.app_label.as_deref());
        parcel.write_string16(None);
        parcel.write_i32(self.originating_uid);
        parcel.write_string16(None);
        parcel.write_string16(self.abi_override.as_deref());
        parcel.write_string16(self.volume_uuid.as_deref());
        parcel.write_i32(-1);
    }

    fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        let mode = parcel.read_i32()?;
        let install_flags = parcel.read_i32()?;
        let install_location = parcel.read_i32()?;
        let install_reason = parcel.read_i32()?;
        let size_bytes = parcel.read_i64()?;
        let app_package_name = parcel.read_string16()?;
        expect_null_parcelable(parcel, "appIcon")?;
        let app_label = parcel.read_string16()?;
        expect_null_parcelable(parcel, "originatingUri")?;
        let originating_uid = parcel.read_i32()?;
        expect_null_parcelable(parcel, "referrerUri")?;
        let abi_override = parcel.read_string16()?;
        let volume_uuid = parcel.read_string16()?;
        let permissions = parcel.read_i32()?;
        if permissions != -1 {
            return Err(ProxyError::codec(
                "grantedRuntimePermissions must be null",
            ));
        }
        Ok(Self {
            mode,
            install_flags,
            install_location,
            install_reason,
            size_bytes,
            app_package_name,
            app_label,
            originating_uid,
            abi_override,
            volume_uuid,
        })
    }
}

fn expect_null_parcelable(parcel: &mut Parcel, field: &str) -> Result<()> {
    match parcel.read_string16()? {
        None => Ok(()),
        Some(class) => Err(ProxyError::codec(format!(
            "{field}: unsupported parcelable {class}"
        ))),
    }
}

/// Status code: the installer needs the user to confirm
pub const STATUS_PENDING_USER_ACTION: i32 = -1;
/// Status code: installed
pub const STATUS_SUCCESS: i32 = 0;

/// Result delivered asynchronously after a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The package was installed
    Success,
    /// The user must confirm; the follow-up intent is launched by the receiver
    PendingUserAction,
    /// The installer reported a failure
    Failure {
        /// Raw status code
        status: i32,
        /// Optional status message
        message: Option<String>,
    },
}

impl InstallOutcome {
    /// Classify a delivered status code
    pub fn from_status(status: i32, message: Option<String>) -> Self {
        match status {
            STATUS_SUCCESS => Self::Success,
            STATUS_PENDING_USER_ACTION => Self::PendingUserAction,
            _ => Self::Failure { status, message },
        }
    }

    /// Symbolic name of a failure status
    pub fn failure_name(status: i32) -> &'static str {
        match status {
            1 => "FAILURE",
            2 => "FAILURE_BLOCKED",
            3 => "FAILURE_ABORTED",
            4 => "FAILURE_INVALID",
            5 => "FAILURE_CONFLICT",
            6 => "FAILURE_STORAGE",
            7 => "FAILURE_INCOMPATIBLE",
            _ => "UNKNOWN",
        }
    }

    /// User-facing description of the outcome
    pub fn describe(&self) -> String {
        match self {
            Self::Success => "Application installed successfully.".to_string(),
            Self::PendingUserAction => "Waiting for user confirmation.".to_string(),
            Self::Failure { status, message } => format!(
                "Install Failed: {status} ({})",
                message.as_deref().unwrap_or("null")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_name_flattening() {
        let admin = ComponentName::new("com.example.owner", "com.example.owner.AdminReceiver");
        assert_eq!(admin.flatten_to_short_string(), "com.example.owner/.AdminReceiver");
        assert_eq!(ComponentName::unflatten("com.example.owner/.AdminReceiver"), Some(admin));

        let foreign = ComponentName::unflatten("com.rosan.dhizuku/org.Receiver");
        assert_eq!(
            foreign.map(|c| c.class),
            Some("org.Receiver".to_string())
        );
        assert_eq!(ComponentName::unflatten("no-slash"), None);
    }

    #[test]
    fn grant_state_codes() {
        for state in [GrantState::Default, GrantState::Granted, GrantState::Denied] {
            assert_eq!(GrantState::from_code(state.code()), Some(state));
        }
        assert_eq!(GrantState::from_code(7), None);
    }

    #[test]
    fn install_outcome_classification() {
        assert_eq!(InstallOutcome::from_status(0, None), InstallOutcome::Success);
        assert_eq!(
            InstallOutcome::from_status(-1, None),
            InstallOutcome::PendingUserAction
        );
        let failed = InstallOutcome::from_status(4, Some("INSTALL_FAILED_INVALID_APK".into()));
        assert_eq!(failed.describe(), "Install Failed: 4 (INSTALL_FAILED_INVALID_APK)");
        assert_eq!(InstallOutcome::failure_name(4), "FAILURE_INVALID");
    }

    #[test]
    fn session_params_nested_encoding() {
        let params = SessionParams::full_install();
        let mut parcel = Parcel::new();
        params.write_to_parcel(&mut parcel);
        // 4 ints + i64 + 7 nullable strings/parcelables + uid + array marker
        assert_eq!(parcel.data_size(), 4 * 4 + 8 + 7 * 4 + 4 + 4);

        parcel.set_data_position(0);
        assert_eq!(SessionParams::read_from_parcel(&mut parcel).ok(), Some(params));
    }
}
