//! Library interface for morlock
//!
//! Morlock installs command-line tools published as GitHub releases. Each
//! package repo carries an install script (`morlock/<app>.toml`) describing
//! how its release assets become an executable; morlock resolves a release,
//! downloads, unpacks and builds it in a staging folder, then links a launcher
//! into a shared `bin/` folder. See [`installer`] for the install state
//! machine.

pub mod api;
pub mod bootstrap;
pub mod build;
pub mod catalog;
pub mod colors;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod fsutil;
pub mod installer;
pub mod lock;
pub mod package_info;
pub mod platform;
pub mod receipt;
pub mod recipe;
pub mod registry;
pub mod reporter;
pub mod symlink;
pub mod version;

// Re-export commonly used types
pub use config::{Config, Context};
pub use error::{MorlockError, Result};
pub use installer::{InstallOptions, Installer};
pub use package_info::PackageIdentity;
pub use version::VersionNumber;
