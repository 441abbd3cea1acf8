//! Release archive downloads with checksum verification.
//!
//! Archives land in `install_folder/archives/<version>/`. The transfer goes
//! to a hidden temp file in that folder and is renamed into place only after
//! it completed and matched its checksum, so the final path never holds a
//! partial file.

use crate::config::Context;
use anyhow::{Context as _, Result, bail};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;

pub const ARCHIVES_DIR: &str = "archives";

/// Lowercase hex SHA-256 of a file.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

async fn checksum_matches(path: &Path, expected: Option<&str>) -> Result<bool> {
    match expected {
        None => Ok(true),
        Some(expected) => Ok(sha256_file(path).await? == expected),
    }
}

/// Download `url` to `dir/filename`, reusing a previously completed download.
pub async fn fetch_archive(
    ctx: &Context,
    dir: &Path,
    url: &str,
    filename: &str,
    expected_sha256: Option<&str>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let output_path = dir.join(filename);

    if output_path.is_file() {
        if checksum_matches(&output_path, expected_sha256).await? {
            tracing::debug!("Reusing downloaded archive {}", output_path.display());
            return Ok(output_path);
        }
        fs::remove_file(&output_path).await?;
    }

    let temp = tempfile::Builder::new()
        .prefix(".download-")
        .tempfile_in(dir)
        .context("Failed to create temporary download file")?
        .into_temp_path();

    let progress = ctx.reporter.progress_bar(filename);
    let bytes = ctx.fetcher.download(url, &temp, &progress).await;
    progress.finish_and_clear();
    let bytes = bytes?;
    tracing::debug!("Downloaded {} bytes from {}", bytes, url);

    if let Some(expected) = expected_sha256 {
        let actual = sha256_file(&temp).await?;
        if actual != expected {
            bail!("checksum mismatch for {filename}: expected {expected}, got {actual}");
        }
    }

    temp.persist(&output_path)
        .with_context(|| format!("Failed to move download to {}", output_path.display()))?;
    Ok(output_path)
}
