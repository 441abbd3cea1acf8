//! Platform detection and asset-name classification.
//!
//! Release assets are tagged with a [`PlatformMask`] derived from their file
//! name. An asset whose name mentions no operating system is treated as
//! generic and usable everywhere, but ranks below an asset built explicitly
//! for the current platform.
//!
//! # Examples
//!
//! ```
//! use morlock::platform::PlatformMask;
//!
//! let mask = PlatformMask::from_asset_name("tool-1.0-x86_64-linux.tar.gz");
//! assert_eq!(mask, PlatformMask::LINUX);
//! assert!(PlatformMask::from_asset_name("tool-1.0.tar.gz").is_generic());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bitset over {windows, macos, linux}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformMask(u8);

impl PlatformMask {
    pub const WINDOWS: PlatformMask = PlatformMask(0b001);
    pub const MACOS: PlatformMask = PlatformMask(0b010);
    pub const LINUX: PlatformMask = PlatformMask(0b100);
    pub const ALL: PlatformMask = PlatformMask(0b111);
    pub const NONE: PlatformMask = PlatformMask(0);

    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::WINDOWS
        } else if cfg!(target_os = "macos") {
            Self::MACOS
        } else {
            Self::LINUX
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "windows" | "win" => Some(Self::WINDOWS),
            "macos" | "mac" | "darwin" | "osx" => Some(Self::MACOS),
            "linux" => Some(Self::LINUX),
            _ => None,
        }
    }

    /// Classify a release asset by the OS tokens in its file name.
    pub fn from_asset_name(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let has = |candidates: &[&str]| tokens.iter().any(|t| candidates.contains(t));

        let mut mask = Self::NONE;
        if has(&["windows", "win", "win32", "win64", "msvc", "mingw"]) || lower.ends_with(".exe")
        {
            mask = mask.union(Self::WINDOWS);
        }
        if has(&["macos", "darwin", "osx", "apple", "mac"]) {
            mask = mask.union(Self::MACOS);
        }
        if has(&["linux", "musl"]) {
            mask = mask.union(Self::LINUX);
        }

        if mask == Self::NONE { Self::ALL } else { mask }
    }

    pub fn union(self, other: PlatformMask) -> PlatformMask {
        PlatformMask(self.0 | other.0)
    }

    pub fn contains(self, other: PlatformMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Built for exactly one operating system.
    pub fn is_specific(self) -> bool {
        self.0.count_ones() == 1
    }

    pub fn is_generic(self) -> bool {
        self == Self::ALL
    }

    /// Number of platforms covered; fewer means more specific.
    pub fn breadth(self) -> u32 {
        self.0.count_ones()
    }
}

impl fmt::Display for PlatformMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.0 & Self::WINDOWS.0 != 0 {
            names.push("windows");
        }
        if self.0 & Self::MACOS.0 != 0 {
            names.push("macos");
        }
        if self.0 & Self::LINUX.0 != 0 {
            names.push("linux");
        }
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}

fn arch_aliases_for(arch: &str) -> &'static [&'static str] {
    match arch {
        "x86_64" => &["x86_64", "amd64", "x64"],
        "aarch64" => &["aarch64", "arm64"],
        "x86" => &["i386", "i686", "x86", "386"],
        "arm" => &["armv7", "armhf", "arm"],
        _ => &[],
    }
}

/// Architecture fit of an asset name: 2 names this CPU, 1 names none,
/// 0 names only a foreign CPU.
pub fn arch_score(filename: &str) -> u8 {
    arch_score_for(filename, std::env::consts::ARCH)
}

fn arch_score_for(filename: &str, arch: &str) -> u8 {
    let lower = filename.to_ascii_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();
    let mentions = |aliases: &[&str]| {
        tokens
            .iter()
            .any(|t| aliases.iter().any(|a| t == a || t.split('_').any(|p| p == *a)))
    };

    if mentions(arch_aliases_for(arch)) {
        return 2;
    }
    let foreign = ["x86_64", "aarch64", "x86", "arm"]
        .iter()
        .filter(|other| **other != arch)
        .any(|other| mentions(arch_aliases_for(other)));
    if foreign { 0 } else { 1 }
}
