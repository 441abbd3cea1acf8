//! Installed package state, read straight from the filesystem.
//!
//! There is no index file. A package's installed versions are the
//! subdirectories of its install folder whose names parse as concrete
//! versions:
//!
//! ```text
//! $MORLOCK_HOME/packages/acme/tool/tool/
//!   1.0.0/                  # installed
//!   1.2.0/                  # installed
//!   .staging-1.3.0/         # in-progress install, ignored
//!   archives/               # cached downloads, ignored
//!   active_version.txt      # "1.2.0"
//!   cache.json
//!   install.script
//! ```
//!
//! The only extra state is `active_version.txt`, naming the version the
//! launcher points at. A marker that names a missing folder reads as "no
//! active version" so a manually deleted version cannot stay active.

use crate::config::Config;
use crate::error::Result;
use crate::fsutil;
use crate::package_info::PackageIdentity;
use crate::version::VersionNumber;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

pub const ACTIVE_MARKER: &str = "active_version.txt";

/// Snapshot of one package's installed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    pub identity: PackageIdentity,
    /// Ascending
    pub installed_versions: Vec<VersionNumber>,
    pub active_version: Option<VersionNumber>,
    pub install_folder: PathBuf,
    pub bin_folder: PathBuf,
}

impl PackageRecord {
    pub fn app_name(&self) -> &str {
        &self.identity.app_name
    }

    pub fn is_installed(&self) -> bool {
        !self.installed_versions.is_empty()
    }

    pub fn highest_version(&self) -> Option<&VersionNumber> {
        self.installed_versions.last()
    }
}

pub struct Registry<'a> {
    config: &'a Config,
}

impl<'a> Registry<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn version_folder(&self, identity: &PackageIdentity, version: &VersionNumber) -> PathBuf {
        self.config
            .install_folder(identity)
            .join(version.to_string())
    }

    pub fn list_installed(&self, identity: &PackageIdentity) -> Result<BTreeSet<VersionNumber>> {
        let folder = self.config.install_folder(identity);
        let mut versions = BTreeSet::new();

        let entries = match fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(versions),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Ok(version) = VersionNumber::parse(&name) {
                if !version.has_wildcard() {
                    versions.insert(version);
                }
            }
        }

        Ok(versions)
    }

    pub fn active_version(&self, identity: &PackageIdentity) -> Option<VersionNumber> {
        let marker = self.config.install_folder(identity).join(ACTIVE_MARKER);
        let text = fs::read_to_string(&marker).ok()?;
        let version = VersionNumber::parse(text.trim()).ok()?;

        if self.version_folder(identity, &version).is_dir() {
            Some(version)
        } else {
            tracing::debug!(
                "Ignoring {}: version {} is not installed",
                marker.display(),
                version
            );
            None
        }
    }

    pub fn set_active(&self, identity: &PackageIdentity, version: &VersionNumber) -> Result<()> {
        let marker = self.config.install_folder(identity).join(ACTIVE_MARKER);
        fsutil::write_atomic(&marker, format!("{version}\n").as_bytes())?;
        Ok(())
    }

    pub fn clear_active(&self, identity: &PackageIdentity) -> Result<()> {
        let marker = self.config.install_folder(identity).join(ACTIVE_MARKER);
        match fs::remove_file(&marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn record(&self, identity: &PackageIdentity) -> Result<PackageRecord> {
        Ok(PackageRecord {
            identity: identity.clone(),
            installed_versions: self.list_installed(identity)?.into_iter().collect(),
            active_version: self.active_version(identity),
            install_folder: self.config.install_folder(identity),
            bin_folder: self.config.bin_dir(),
        })
    }

    /// Every package folder under `packages/`, installed or not.
    pub fn known_identities(&self) -> Result<Vec<PackageIdentity>> {
        let root = self.config.packages_dir();
        let mut identities = Vec::new();

        for host in subdirs(&root)? {
            for repo in subdirs(&root.join(&host))? {
                for app in subdirs(&root.join(&host).join(&repo))? {
                    identities.push(PackageIdentity::github(&host, &repo, &app));
                }
            }
        }

        identities.sort();
        Ok(identities)
    }

    /// Packages with at least one installed version.
    pub fn list_all(&self) -> Result<Vec<PackageRecord>> {
        let mut records = Vec::new();
        for identity in self.known_identities()? {
            let record = self.record(&identity)?;
            if record.is_installed() {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Non-hidden subdirectory names of `dir`; empty when `dir` is missing.
fn subdirs(dir: &std::path::Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.file_type()?.is_dir() {
            continue;
        }
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn v(text: &str) -> VersionNumber {
        VersionNumber::parse(text).unwrap()
    }

    fn setup() -> (TempDir, Config, PackageIdentity) {
        let dir = TempDir::new().unwrap();
        let config = Config::with_home(dir.path());
        let identity = PackageIdentity::github("acme", "tool", "tool");
        (dir, config, identity)
    }

    #[test]
    fn test_list_installed_ignores_non_versions() {
        let (_dir, config, identity) = setup();
        let folder = config.install_folder(&identity);
        for name in ["1.0", "2.0.1", ".staging-3.0", "archives", "1.x"] {
            fs::create_dir_all(folder.join(name)).unwrap();
        }
        fs::write(folder.join("3.0"), "a file, not a version").unwrap();

        let registry = Registry::new(&config);
        let versions: Vec<_> = registry.list_installed(&identity).unwrap().into_iter().collect();
        assert_eq!(versions, vec![v("1.0"), v("2.0.1")]);
    }

    #[test]
    fn test_missing_package_is_empty() {
        let (_dir, config, identity) = setup();
        let registry = Registry::new(&config);
        assert!(registry.list_installed(&identity).unwrap().is_empty());
        assert!(registry.active_version(&identity).is_none());
        assert!(registry.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_active_marker_self_heals() {
        let (_dir, config, identity) = setup();
        let registry = Registry::new(&config);
        fs::create_dir_all(registry.version_folder(&identity, &v("1.0"))).unwrap();

        registry.set_active(&identity, &v("1.0")).unwrap();
        assert_eq!(registry.active_version(&identity), Some(v("1.0")));

        fs::remove_dir(registry.version_folder(&identity, &v("1.0"))).unwrap();
        assert_eq!(registry.active_version(&identity), None);

        registry.clear_active(&identity).unwrap();
        registry.clear_active(&identity).unwrap();
    }

    #[test]
    fn test_list_all() {
        let (_dir, config, identity) = setup();
        let registry = Registry::new(&config);
        let other = PackageIdentity::github("acme", "kit", "hammer");
        let empty = PackageIdentity::github("acme", "kit", "saw");

        fs::create_dir_all(registry.version_folder(&identity, &v("1.0"))).unwrap();
        fs::create_dir_all(registry.version_folder(&other, &v("0.3"))).unwrap();
        fs::create_dir_all(config.install_folder(&empty)).unwrap();
        registry.set_active(&other, &v("0.3")).unwrap();

        let records = registry.list_all().unwrap();
        let apps: Vec<&str> = records.iter().map(|r| r.app_name()).collect();
        assert_eq!(apps, vec!["hammer", "tool"]);
        assert_eq!(records[0].active_version, Some(v("0.3")));
        assert_eq!(records[1].active_version, None);

        assert_eq!(registry.known_identities().unwrap().len(), 3);
    }
}
