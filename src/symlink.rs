//! Launchers in the shared `bin/` folder.
//!
//! On Unix a launcher is a symlink `bin/<app>` pointing at the active
//! version's executable. It is replaced atomically: the new link is created
//! under a temporary name and renamed over the old one, so `bin/<app>` never
//! disappears mid-update. Windows gets a `bin/<app>.cmd` shim script instead.
//!
//! Writing into `bin/` can need elevated privileges when `MORLOCK_HOME` lives
//! in a system location. In that case an interactive session retries once
//! through `sudo`; a non-interactive one reports `PermissionDenied`.

use crate::config::Config;
use crate::error::{MorlockError, Result};
#[cfg(not(unix))]
use crate::fsutil;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Path of the launcher for `app`.
pub fn launcher_path(config: &Config, app: &str) -> PathBuf {
    if cfg!(windows) {
        config.bin_dir().join(format!("{app}.cmd"))
    } else {
        config.bin_dir().join(app)
    }
}

/// Point the launcher for `app` at `target`, replacing any existing one.
pub fn link_launcher(config: &Config, app: &str, target: &Path) -> Result<PathBuf> {
    let link = launcher_path(config, app);

    match create_launcher(&link, target) {
        Ok(()) => Ok(link),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            if !config.interactive || cfg!(windows) {
                return Err(MorlockError::PermissionDenied { path: link });
            }
            tracing::info!("Retrying link of {} with sudo", link.display());
            elevated(&["ln", "-sfn"], &[target, link.as_path()])?;
            Ok(link)
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove the launcher for `app` if it points into `owner_folder`.
///
/// Returns whether a launcher was removed. Launchers owned by another
/// package with the same app name are left alone.
pub fn unlink_launcher(config: &Config, app: &str, owner_folder: &Path) -> Result<bool> {
    let link = launcher_path(config, app);
    match launcher_target(&link) {
        Some(target) if target.starts_with(owner_folder) => {}
        _ => return Ok(false),
    }

    match fs::remove_file(&link) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            if !config.interactive || cfg!(windows) {
                return Err(MorlockError::PermissionDenied { path: link });
            }
            elevated(&["rm", "-f"], &[link.as_path()])?;
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Where an existing launcher points, if it exists.
pub fn launcher_target(link: &Path) -> Option<PathBuf> {
    if cfg!(windows) {
        let script = fs::read_to_string(link).ok()?;
        script
            .lines()
            .find_map(|line| line.strip_prefix('"'))
            .and_then(|rest| rest.split('"').next())
            .map(PathBuf::from)
    } else {
        fs::read_link(link).ok()
    }
}

#[cfg(unix)]
fn create_launcher(link: &Path, target: &Path) -> io::Result<()> {
    let dir = link.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{name}.morlock-link"));
    let _ = fs::remove_file(&temp);

    std::os::unix::fs::symlink(target, &temp)?;
    if let Err(e) = fs::rename(&temp, link) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

#[cfg(not(unix))]
fn create_launcher(link: &Path, target: &Path) -> io::Result<()> {
    let script = format!("@echo off\r\n\"{}\" %*\r\n", target.display());
    fsutil::write_atomic(link, script.as_bytes())?;
    fsutil::make_executable(link)
}

fn elevated(command: &[&str], paths: &[&Path]) -> Result<()> {
    let status = Command::new("sudo")
        .args(command)
        .args(paths)
        .status()
        .map_err(|e| MorlockError::Other(anyhow::anyhow!("failed to run sudo: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(MorlockError::PermissionDenied {
            path: paths.last().map(|p| p.to_path_buf()).unwrap_or_default(),
        })
    }
}
