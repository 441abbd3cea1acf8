//! Archive unpacking into a version staging folder.
//!
//! Supported payloads:
//! - gzip-compressed tar (`.tar.gz`, `.tgz`, GitHub source tarballs)
//! - zip
//! - anything else is a bare executable, copied to `bin/<app>`
//!
//! Most release archives wrap their contents in one top-level directory
//! (`tool-1.2.0/bin/tool`). That directory is hoisted so the version folder
//! always holds the payload directly:
//!
//! ```text
//! archive:  tool-1.2.0/bin/tool
//! result:   packages/acme/tool/tool/1.2.0/bin/tool
//! ```
//!
//! Entries whose paths would land outside the destination are rejected.

use crate::fsutil;
use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path};
use tar::Archive;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
    Raw,
}

/// Detect the format from the file name, then from magic bytes.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let name = path.to_string_lossy().to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        return Ok(ArchiveFormat::TarGz);
    }
    if name.ends_with(".zip") {
        return Ok(ArchiveFormat::Zip);
    }

    let mut magic = [0u8; 4];
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let n = file.read(&mut magic)?;
    Ok(match &magic[..n] {
        [0x1f, 0x8b, ..] => ArchiveFormat::TarGz,
        [b'P', b'K', 0x03, 0x04] => ArchiveFormat::Zip,
        _ => ArchiveFormat::Raw,
    })
}

/// Unpack `archive_path` into `dest`, hoisting a single top-level directory.
///
/// `app_name` names the launcher when the payload is a bare executable.
pub fn unpack(archive_path: &Path, dest: &Path, app_name: &str) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    match detect_format(archive_path)? {
        ArchiveFormat::TarGz => {
            extract_tar_gz(archive_path, dest)?;
            hoist_single_root(dest)?;
        }
        ArchiveFormat::Zip => {
            extract_zip(archive_path, dest)?;
            hoist_single_root(dest)?;
        }
        ArchiveFormat::Raw => install_raw(archive_path, dest, app_name)?,
    }

    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);

    for entry in archive.entries().context("Failed to read tar archive")? {
        let mut entry = entry.context("Corrupt tar entry")?;
        let kind = entry.header().entry_type();
        if kind.is_pax_global_extensions() || kind.is_pax_local_extensions() {
            continue;
        }

        let path = entry.path()?.into_owned();
        ensure_relative(&path)?;
        entry
            .unpack_in(dest)
            .with_context(|| format!("Failed to extract {}", path.display()))?;
    }

    Ok(())
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file).context("Failed to read zip archive")?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Corrupt zip entry")?;
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            bail!("Invalid path in archive: {}", entry.name());
        };
        let target = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    Ok(())
}

fn install_raw(archive_path: &Path, dest: &Path, app_name: &str) -> Result<()> {
    let bin = dest.join("bin");
    fs::create_dir_all(&bin)?;
    let name = if cfg!(windows) {
        format!("{app_name}.exe")
    } else {
        app_name.to_string()
    };
    let target = bin.join(name);
    fs::copy(archive_path, &target)
        .with_context(|| format!("Failed to copy executable to {}", target.display()))?;
    fsutil::make_executable(&target)?;
    Ok(())
}

fn ensure_relative(path: &Path) -> Result<()> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        bail!("Invalid path in archive: {}", path.display());
    }
    Ok(())
}

/// If `dest` holds exactly one directory, move its contents up one level.
pub fn hoist_single_root(dest: &Path) -> Result<()> {
    let entries: Vec<_> = fs::read_dir(dest)?.collect::<io::Result<_>>()?;
    let [only] = entries.as_slice() else {
        return Ok(());
    };
    if !only.file_type()?.is_dir() {
        return Ok(());
    }

    // Rename first so a child sharing the root's name cannot collide
    let parked = dest.join(".morlock-hoist");
    fs::rename(only.path(), &parked)?;
    for child in fs::read_dir(&parked)? {
        let child = child?;
        fs::rename(child.path(), dest.join(child.file_name()))?;
    }
    fs::remove_dir(&parked)?;
    Ok(())
}
