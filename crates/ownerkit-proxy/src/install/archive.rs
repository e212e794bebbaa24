//! Package source detection and archive scanning

use std::collections::HashSet;
use std::io::{Read, Seek};
use std::path::Path;

use ownerkit_core::{ProxyError, Result};
use zip::ZipArchive;

const APK_MIME: &str = "application/vnd.android.package-archive";
const ARCHIVE_MIMES: [&str; 2] = ["application/zip", "application/octet-stream"];

/// What kind of package source a file is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// A single package file
    Apk,
    /// A bundle of split packages (xapk / zip)
    Archive,
}

impl PackageKind {
    /// Classify by MIME type first, then by file extension
    pub fn detect(path: &Path, mime: Option<&str>) -> Result<Self> {
        let mime = mime.unwrap_or_default();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        if mime == APK_MIME || extension.as_deref() == Some("apk") {
            return Ok(Self::Apk);
        }
        if ARCHIVE_MIMES.contains(&mime) || matches!(extension.as_deref(), Some("xapk" | "zip")) {
            return Ok(Self::Archive);
        }
        Err(ProxyError::io(format!(
            "Unknown file type. MIME: {mime}, Path: {}",
            path.display()
        )))
    }
}

/// An archive member that will be written into the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallableEntry {
    /// Index inside the archive
    pub index: usize,
    /// Full path inside the archive
    pub path: String,
    /// Name the entry is written under in the session
    pub session_name: String,
    /// Uncompressed size
    pub size: u64,
}

/// Whether an archive member is an installable package
pub fn is_installable(path: &str, is_dir: bool) -> bool {
    !is_dir && path.to_ascii_lowercase().ends_with(".apk")
}

/// List the installable members of `archive`, in archive order
///
/// Session entry names are the member's file name; clashes between members
/// in different directories get their archive index as a prefix.
pub fn installable_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<InstallableEntry>> {
    let mut entries = Vec::new();
    let mut used = HashSet::new();
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        if !is_installable(file.name(), file.is_dir()) {
            continue;
        }
        let path = file.name().to_string();
        let base = path.rsplit('/').next().unwrap_or(&path).to_string();
        let session_name = if used.contains(&base) {
            format!("{index}_{base}")
        } else {
            base
        };
        used.insert(session_name.clone());
        entries.push(InstallableEntry {
            index,
            path,
            session_name,
            size: file.size(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;

    fn bundle(members: &[(&str, &[u8])]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in members {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        let cursor = writer.finish().unwrap();
        ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap()
    }

    #[test]
    fn detects_by_mime_then_extension() {
        let path = Path::new("/sdcard/Download/app.bin");
        assert_eq!(PackageKind::detect(path, Some(APK_MIME)).ok(), Some(PackageKind::Apk));
        assert_eq!(
            PackageKind::detect(path, Some("application/zip")).ok(),
            Some(PackageKind::Archive)
        );
        assert_eq!(
            PackageKind::detect(Path::new("game.XAPK"), None).ok(),
            Some(PackageKind::Archive)
        );
        assert_eq!(PackageKind::detect(Path::new("base.apk"), Some("")).ok(), Some(PackageKind::Apk));

        let err = PackageKind::detect(Path::new("notes.txt"), Some("text/plain")).unwrap_err();
        assert!(err.to_string().contains("Unknown file type. MIME: text/plain"));
    }

    #[test]
    fn only_apk_members_are_installable() {
        let mut archive = bundle(&[
            ("manifest.json", b"{}"),
            ("icon.png", b"png"),
            ("splits/", b""),
            ("base.apk", b"base"),
            ("splits/config.arm64_v8a.apk", b"abi"),
            ("Android/obb/data.obb", b"obb"),
        ]);
        let entries = installable_entries(&mut archive).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.session_name.as_str()).collect();
        assert_eq!(names, ["base.apk", "config.arm64_v8a.apk"]);
        assert_eq!(entries[1].path, "splits/config.arm64_v8a.apk");
        assert_eq!(entries[1].size, 3);
    }

    #[test]
    fn clashing_file_names_are_disambiguated() {
        let mut archive = bundle(&[("a/base.apk", b"1"), ("b/base.apk", b"2")]);
        let entries = installable_entries(&mut archive).unwrap();
        assert_eq!(entries[0].session_name, "base.apk");
        assert_eq!(entries[1].session_name, "1_base.apk");
    }

    #[test]
    fn archive_without_packages_has_no_entries() {
        let mut archive = bundle(&[("readme.txt", b"hi")]);
        assert!(installable_entries(&mut archive).unwrap().is_empty());
    }
}
