//! Versioned request schema table
//!
//! Each privileged call is described once as an [`OperationSpec`]: its
//! interface family, ordered typed fields (each gated by the first platform
//! version that carries it) and the reply type. The codec is driven entirely
//! by these descriptions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ProxyError;
use crate::sdk;

use FieldKind::*;

/// Interface a remote operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceFamily {
    /// `IDevicePolicyManager`
    DevicePolicy,
    /// `IPackageInstaller`
    PackageInstaller,
    /// `IPackageInstallerSession`
    InstallerSession,
    /// Install service hosted inside the delegation broker
    InstallService,
}

impl InterfaceFamily {
    /// Every family, in table order
    pub const ALL: [InterfaceFamily; 4] = [
        Self::DevicePolicy,
        Self::PackageInstaller,
        Self::InstallerSession,
        Self::InstallService,
    ];

    /// Interface descriptor written into the request token
    pub fn descriptor(&self) -> &'static str {
        match self {
            Self::DevicePolicy => "android.app.admin.IDevicePolicyManager",
            Self::PackageInstaller => "android.content.pm.IPackageInstaller",
            Self::InstallerSession => "android.content.pm.IPackageInstallerSession",
            Self::InstallService => "io.ownerkit.IInstallService",
        }
    }

    /// Generated stub class holding the `TRANSACTION_*` constants
    ///
    /// The broker-hosted install service has fixed codes and no stub to
    /// introspect.
    pub fn stub_class(&self) -> Option<String> {
        match self {
            Self::InstallService => None,
            other => Some(format!("{}$Stub", other.descriptor())),
        }
    }

    /// Service-manager name, for families registered there
    pub fn service_name(&self) -> Option<&'static str> {
        match self {
            Self::DevicePolicy => Some("device_policy"),
            _ => None,
        }
    }

    /// Config and CLI name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DevicePolicy => "device_policy",
            Self::PackageInstaller => "package_installer",
            Self::InstallerSession => "installer_session",
            Self::InstallService => "install_service",
        }
    }
}

impl fmt::Display for InterfaceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceFamily {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| ProxyError::config(format!("unknown interface family '{s}'")))
    }
}

/// Wire type of a request field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Fixed-width i32
    I32,
    /// Fixed-width i64
    I64,
    /// Boolean as i32
    Bool,
    /// Length-prefixed UTF-16 string, nullable
    String16,
    /// Component identity behind a non-null marker
    Component,
    /// Install session parameters behind a non-null marker
    SessionParams,
    /// Intent sender (binder) behind a non-null marker
    StatusReceiver,
    /// `ParcelFileDescriptor` behind a non-null marker
    FileDescriptor,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Bool => "bool",
            Self::String16 => "string16",
            Self::Component => "component",
            Self::SessionParams => "session_params",
            Self::StatusReceiver => "status_receiver",
            Self::FileDescriptor => "fd",
        };
        f.write_str(name)
    }
}

/// One request field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Parameter name, for diagnostics
    pub name: &'static str,
    /// Wire type
    pub kind: FieldKind,
    /// First platform version that sends this field
    pub since_sdk: u32,
}

impl FieldSpec {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            since_sdk: 0,
        }
    }

    const fn since(name: &'static str, kind: FieldKind, since_sdk: u32) -> Self {
        Self {
            name,
            kind,
            since_sdk,
        }
    }
}

/// Declared reply type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Nothing after the exception marker
    Void,
    /// An i32
    I32,
    /// A boolean as i32
    Bool,
    /// A binder reference
    Binder,
    /// A nullable `ParcelFileDescriptor`
    FileDescriptor,
}

/// Immutable description of one privileged call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSpec {
    /// Interface family
    pub family: InterfaceFamily,
    /// Method name, as used in `TRANSACTION_<name>`
    pub name: &'static str,
    /// Ordered request fields, including version-gated ones
    pub fields: &'static [FieldSpec],
    /// Reply type
    pub reply: ReplyKind,
}

impl OperationSpec {
    /// Fields sent on `sdk_level`, in order
    pub fn fields_for(&self, sdk_level: u32) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields
            .iter()
            .filter(move |field| field.since_sdk <= sdk_level)
    }

    /// Name of the dispatch-table constant
    pub fn transaction_field(&self) -> String {
        format!("TRANSACTION_{}", self.name)
    }
}

impl fmt::Display for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family, self.name)
    }
}

/// Device policy operations
pub mod device_policy {
    use super::*;

    /// `setApplicationHidden(admin, callerPackage, packageName, hidden) -> bool`
    pub const SET_APPLICATION_HIDDEN: OperationSpec = OperationSpec {
        family: InterfaceFamily::DevicePolicy,
        name: "setApplicationHidden",
        fields: &[
            FieldSpec::new("admin", Component),
            FieldSpec::new("callerPackage", String16),
            FieldSpec::new("packageName", String16),
            FieldSpec::new("hidden", Bool),
        ],
        reply: ReplyKind::Bool,
    };

    /// `isApplicationHidden(admin, callerPackage, packageName) -> bool`
    pub const IS_APPLICATION_HIDDEN: OperationSpec = OperationSpec {
        family: InterfaceFamily::DevicePolicy,
        name: "isApplicationHidden",
        fields: &[
            FieldSpec::new("admin", Component),
            FieldSpec::new("callerPackage", String16),
            FieldSpec::new("packageName", String16),
        ],
        reply: ReplyKind::Bool,
    };

    /// `getPermissionGrantState(admin, callerPackage, packageName, permission) -> int`
    pub const GET_PERMISSION_GRANT_STATE: OperationSpec = OperationSpec {
        family: InterfaceFamily::DevicePolicy,
        name: "getPermissionGrantState",
        fields: &[
            FieldSpec::new("admin", Component),
            FieldSpec::new("callerPackage", String16),
            FieldSpec::new("packageName", String16),
            FieldSpec::new("permission", String16),
        ],
        reply: ReplyKind::I32,
    };

    /// `setPermissionGrantState(admin, callerPackage, packageName, permission, grantState) -> bool`
    pub const SET_PERMISSION_GRANT_STATE: OperationSpec = OperationSpec {
        family: InterfaceFamily::DevicePolicy,
        name: "setPermissionGrantState",
        fields: &[
            FieldSpec::new("admin", Component),
            FieldSpec::new("callerPackage", String16),
            FieldSpec::new("packageName", String16),
            FieldSpec::new("permission", String16),
            FieldSpec::new("grantState", I32),
        ],
        reply: ReplyKind::Bool,
    };
}

/// Package installer operations
pub mod package_installer {
    use super::*;

    /// `createSession(params, installerPackageName[, installerAttributionTag], userId) -> int`
    pub const CREATE_SESSION: OperationSpec = OperationSpec {
        family: InterfaceFamily::PackageInstaller,
        name: "createSession",
        fields: &[
            FieldSpec::new("params", SessionParams),
            FieldSpec::new("installerPackageName", String16),
            FieldSpec::since("installerAttributionTag", String16, sdk::S),
            FieldSpec::new("userId", I32),
        ],
        reply: ReplyKind::I32,
    };

    /// `openSession(sessionId) -> IPackageInstallerSession`
    pub const OPEN_SESSION: OperationSpec = OperationSpec {
        family: InterfaceFamily::PackageInstaller,
        name: "openSession",
        fields: &[FieldSpec::new("sessionId", I32)],
        reply: ReplyKind::Binder,
    };

    /// `abandonSession(sessionId)`
    pub const ABANDON_SESSION: OperationSpec = OperationSpec {
        family: InterfaceFamily::PackageInstaller,
        name: "abandonSession",
        fields: &[FieldSpec::new("sessionId", I32)],
        reply: ReplyKind::Void,
    };
}

/// Installer session operations
pub mod installer_session {
    use super::*;

    /// `openWrite(name, offsetBytes, lengthBytes) -> ParcelFileDescriptor`
    pub const OPEN_WRITE: OperationSpec = OperationSpec {
        family: InterfaceFamily::InstallerSession,
        name: "openWrite",
        fields: &[
            FieldSpec::new("name", String16),
            FieldSpec::new("offsetBytes", I64),
            FieldSpec::new("lengthBytes", I64),
        ],
        reply: ReplyKind::FileDescriptor,
    };

    /// `fsync(name)`
    pub const FSYNC: OperationSpec = OperationSpec {
        family: InterfaceFamily::InstallerSession,
        name: "fsync",
        fields: &[FieldSpec::new("name", String16)],
        reply: ReplyKind::Void,
    };

    /// `commit(statusReceiver[, forTransferred])`
    pub const COMMIT: OperationSpec = OperationSpec {
        family: InterfaceFamily::InstallerSession,
        name: "commit",
        fields: &[
            FieldSpec::new("statusReceiver", StatusReceiver),
            FieldSpec::since("forTransferred", Bool, sdk::P),
        ],
        reply: ReplyKind::Void,
    };
}

/// Broker-hosted install service operations
pub mod install_service {
    use super::*;

    /// `createInstallSession() -> int`
    pub const CREATE_INSTALL_SESSION: OperationSpec = OperationSpec {
        family: InterfaceFamily::InstallService,
        name: "createInstallSession",
        fields: &[],
        reply: ReplyKind::I32,
    };

    /// `writeToSession(sessionId, name, fd)`
    pub const WRITE_TO_SESSION: OperationSpec = OperationSpec {
        family: InterfaceFamily::InstallService,
        name: "writeToSession",
        fields: &[
            FieldSpec::new("sessionId", I32),
            FieldSpec::new("name", String16),
            FieldSpec::new("fd", FileDescriptor),
        ],
        reply: ReplyKind::Void,
    };

    /// `commitSession(sessionId)`
    pub const COMMIT_SESSION: OperationSpec = OperationSpec {
        family: InterfaceFamily::InstallService,
        name: "commitSession",
        fields: &[FieldSpec::new("sessionId", I32)],
        reply: ReplyKind::Void,
    };

    /// `abandonSession(sessionId)`
    pub const ABANDON_SESSION: OperationSpec = OperationSpec {
        family: InterfaceFamily::InstallService,
        name: "abandonSession",
        fields: &[FieldSpec::new("sessionId", I32)],
        reply: ReplyKind::Void,
    };

    /// `destroy()`
    pub const DESTROY: OperationSpec = OperationSpec {
        family: InterfaceFamily::InstallService,
        name: "destroy",
        fields: &[],
        reply: ReplyKind::Void,
    };
}

/// Every known operation
pub static OPERATIONS: &[OperationSpec] = &[
    device_policy::SET_APPLICATION_HIDDEN,
    device_policy::IS_APPLICATION_HIDDEN,
    device_policy::GET_PERMISSION_GRANT_STATE,
    device_policy::SET_PERMISSION_GRANT_STATE,
    package_installer::CREATE_SESSION,
    package_installer::OPEN_SESSION,
    package_installer::ABANDON_SESSION,
    installer_session::OPEN_WRITE,
    installer_session::FSYNC,
    installer_session::COMMIT,
    install_service::CREATE_INSTALL_SESSION,
    install_service::WRITE_TO_SESSION,
    install_service::COMMIT_SESSION,
    install_service::ABANDON_SESSION,
    install_service::DESTROY,
];

/// Find an operation by family and name
pub fn lookup(family: InterfaceFamily, name: &str) -> Option<&'static OperationSpec> {
    OPERATIONS
        .iter()
        .find(|spec| spec.family == family && spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_gated_fields() {
        let commit = installer_session::COMMIT;
        assert_eq!(commit.fields_for(27).count(), 1);
        assert_eq!(commit.fields_for(28).count(), 2);

        let create = package_installer::CREATE_SESSION;
        let names: Vec<_> = create.fields_for(30).map(|f| f.name).collect();
        assert_eq!(names, ["params", "installerPackageName", "userId"]);
        assert_eq!(create.fields_for(31).count(), 4);
    }

    #[test]
    fn lookup_and_family_names() {
        assert_eq!(
            lookup(InterfaceFamily::DevicePolicy, "setPermissionGrantState"),
            Some(&device_policy::SET_PERMISSION_GRANT_STATE)
        );
        assert!(lookup(InterfaceFamily::InstallService, "setApplicationHidden").is_none());

        for family in InterfaceFamily::ALL {
            assert_eq!(family.as_str().parse::<InterfaceFamily>().ok(), Some(family));
        }
        assert!("window".parse::<InterfaceFamily>().is_err());
    }

    #[test]
    fn stub_class_names() {
        assert_eq!(
            InterfaceFamily::DevicePolicy.stub_class().as_deref(),
            Some("android.app.admin.IDevicePolicyManager$Stub")
        );
        assert_eq!(InterfaceFamily::InstallService.stub_class(), None);
        assert_eq!(
            device_policy::IS_APPLICATION_HIDDEN.transaction_field(),
            "TRANSACTION_isApplicationHidden"
        );
    }
}
