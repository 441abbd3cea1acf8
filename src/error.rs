use std::path::PathBuf;
use thiserror::Error;

use crate::api::FetchError;

#[derive(Error, Debug)]
pub enum MorlockError {
    #[error("Unrecognized package name '{name}': {reason}")]
    UnrecognizedPackageName { name: String, reason: String },

    #[error("Ambiguous package name '{name}', matches: {}", .candidates.join(", "))]
    AmbiguousPackageName {
        name: String,
        candidates: Vec<String>,
    },

    #[error("Invalid version number '{0}'")]
    InvalidVersion(String),

    #[error("No morlock install script found for this repo: {package} ({url})")]
    ScriptNotFound { package: String, url: String },

    #[error("Invalid install script for {package}: {message}")]
    InvalidScript { package: String, message: String },

    #[error("Release provider unavailable for {package}: {message}")]
    ProviderUnavailable { package: String, message: String },

    #[error("Repository not found: {package}")]
    RepoNotFound { package: String },

    #[error(
        "No compatible release of {package}{} for {platform}; available: {}",
        constraint_suffix(.constraint),
        available_list(.available)
    )]
    NoCompatibleRelease {
        package: String,
        constraint: Option<String>,
        platform: String,
        available: Vec<String>,
    },

    #[error("{package} does not support {platform}")]
    UnsupportedPlatform { package: String, platform: String },

    #[error("Downloading {package} {version} failed: {message}")]
    DownloadFailed {
        package: String,
        version: String,
        message: String,
    },

    #[error("Unpacking {package} {version} failed: {message}")]
    UnpackFailed {
        package: String,
        version: String,
        message: String,
    },

    #[error("Building {package} {version} failed: {message}")]
    BuildFailed {
        package: String,
        version: String,
        message: String,
        output: String,
    },

    #[error("Linking {package} {version} failed: {message}")]
    LinkFailed {
        package: String,
        version: String,
        message: String,
    },

    #[error("Permission denied writing {}; re-run with elevated privileges", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error(
        "{package} is not installed{}",
        suggestion_suffix(.suggestion)
    )]
    NotInstalled {
        package: String,
        suggestion: Option<String>,
    },

    #[error("{package} is locked by another morlock process ({})", .path.display())]
    PackageLocked { package: String, path: PathBuf },

    #[error("Interrupted")]
    Interrupted,

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl MorlockError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnrecognizedPackageName { .. }
            | Self::AmbiguousPackageName { .. }
            | Self::InvalidVersion(_)
            | Self::ScriptNotFound { .. }
            | Self::InvalidScript { .. }
            | Self::NotInstalled { .. } => 2,
            Self::ProviderUnavailable { .. }
            | Self::RepoNotFound { .. }
            | Self::NoCompatibleRelease { .. }
            | Self::UnsupportedPlatform { .. }
            | Self::Fetch(_) => 3,
            Self::DownloadFailed { .. } => 4,
            Self::UnpackFailed { .. } => 5,
            Self::BuildFailed { .. } => 6,
            Self::PermissionDenied { .. } | Self::LinkFailed { .. } => 7,
            Self::PackageLocked { .. } => 8,
            Self::Interrupted => 130,
            Self::IoError(_) | Self::JsonError(_) | Self::Other(_) => 1,
        }
    }

    /// Captured build output, when the failure came from a build step.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::BuildFailed { output, .. } if !output.trim().is_empty() => Some(output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MorlockError>;

fn constraint_suffix(constraint: &Option<String>) -> String {
    constraint
        .as_ref()
        .map(|c| format!(" matching {c}"))
        .unwrap_or_default()
}

fn available_list(available: &[String]) -> String {
    if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    }
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}
