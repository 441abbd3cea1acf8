//! Install recipes (`install.script`).
//!
//! A recipe is a small TOML document describing how one package is built and
//! which file becomes its launcher:
//!
//! ```toml
//! app = "tool"
//! source = "auto"            # auto | assets | tarball
//! asset = "musl"             # optional asset name filter
//! executable = "bin/tool"    # optional launcher target
//! platforms = ["linux", "macos"]
//!
//! [checksums]
//! "tool-linux.tar.gz" = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//!
//! [[steps]]
//! run = "make install PREFIX=\"$MORLOCK_INSTALL_FOLDER\""
//!
//! [[steps]]
//! install_binary = "target/release/tool"
//! ```
//!
//! Steps run in order inside the staging folder during the build phase.

use crate::error::{MorlockError, Result};
use crate::platform::PlatformMask;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where the payload for a release comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Prefer platform binaries, fall back to the source tarball
    #[default]
    Auto,
    /// Uploaded release assets only
    Assets,
    /// GitHub-generated source tarball only
    Tarball,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildStep {
    /// Shell command run with the staging folder as working directory
    Run { run: String },
    /// Fetch an extra file into the staging folder
    Download {
        download: String,
        #[serde(default)]
        filename: Option<String>,
    },
    /// Unpack an archive already inside the staging folder
    Unpack { unpack: String },
    /// Copy a built file to `bin/<name>` and mark it executable
    InstallBinary {
        install_binary: String,
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageScript {
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: SourceKind,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<BuildStep>,
}

impl PackageScript {
    /// Parse recipe text. `package` names the owner in error messages.
    pub fn parse(text: &str, package: &str) -> Result<Self> {
        let script: PackageScript =
            toml::from_str(text).map_err(|e| MorlockError::InvalidScript {
                package: package.to_string(),
                message: e.message().to_string(),
            })?;

        if let Some(platforms) = &script.platforms {
            if let Some(bad) = platforms.iter().find(|p| PlatformMask::from_name(p).is_none()) {
                return Err(MorlockError::InvalidScript {
                    package: package.to_string(),
                    message: format!("unknown platform '{bad}'"),
                });
            }
        }

        Ok(script)
    }

    /// Platforms this recipe supports; all when unspecified.
    pub fn platform_mask(&self) -> PlatformMask {
        match &self.platforms {
            None => PlatformMask::ALL,
            Some(names) => names
                .iter()
                .filter_map(|n| PlatformMask::from_name(n))
                .fold(PlatformMask::NONE, PlatformMask::union),
        }
    }

    /// Expected SHA-256 for an asset file name, lowercased.
    pub fn checksum_for(&self, filename: &str) -> Option<String> {
        self.checksums
            .get(filename)
            .map(|sum| sum.trim().to_ascii_lowercase())
    }
}
