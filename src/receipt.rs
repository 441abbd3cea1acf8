//! Install receipts.
//!
//! Every committed version folder carries a `.morlock-receipt.json` written
//! while the version was still staged:
//!
//! ```text
//! packages/acme/tool/tool/1.2.0/
//!   .morlock-receipt.json    # how and when this version was installed
//!   bin/tool
//! ```
//!
//! Linking reads the launcher target from the receipt, and uninstall uses the
//! recorded archive name to drop the cached download.

use crate::package_info::PackageIdentity;
use crate::version::VersionNumber;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RECEIPT_FILE: &str = ".morlock-receipt.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub morlock_version: String,
    pub identity: PackageIdentity,
    pub version: VersionNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    /// Launcher target relative to the version folder
    pub executable: String,
    pub installed_as_dependency: bool,
    pub installed_on_request: bool,
    pub time: DateTime<Utc>,
}

impl InstallReceipt {
    pub fn new(
        identity: &PackageIdentity,
        version: &VersionNumber,
        executable: &str,
        installed_on_request: bool,
    ) -> Self {
        Self {
            morlock_version: format!("morlock/{}", env!("CARGO_PKG_VERSION")),
            identity: identity.clone(),
            version: version.clone(),
            asset_url: None,
            archive: None,
            executable: executable.replace('\\', "/"),
            installed_as_dependency: !installed_on_request,
            installed_on_request,
            time: Utc::now(),
        }
    }

    pub fn with_asset(mut self, url: &str, archive: &str) -> Self {
        self.asset_url = Some(url.to_string());
        self.archive = Some(archive.to_string());
        self
    }

    pub fn read(version_folder: &Path) -> Result<Self> {
        let path = version_folder.join(RECEIPT_FILE);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read receipt: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt: {}", path.display()))
    }

    pub fn write(&self, version_folder: &Path) -> Result<()> {
        let path = version_folder.join(RECEIPT_FILE);
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize install receipt")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write receipt: {}", path.display()))?;
        Ok(())
    }
}
