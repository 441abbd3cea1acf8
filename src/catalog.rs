//! Release metadata for one package, cached as `cache.json`.
//!
//! The catalog flattens GitHub releases into [`ReleaseAsset`] rows: one per
//! installable uploaded file plus one for the generated source tarball of
//! each release. Rows are cached next to the package's versions and reused
//! until they are older than the configured TTL.
//!
//! Staleness rules:
//! - a fresh cache is served without touching the network
//! - `force_refresh` (used by `update` and `install --refresh`) always asks
//!   the provider and surfaces its failure
//! - a stale cache is refreshed, but kept and used if the provider is down
//!
//! The cache file is replaced atomically, so a failed refresh never leaves a
//! truncated file behind.

use crate::config::Context;
use crate::error::{MorlockError, Result};
use crate::fsutil;
use crate::package_info::PackageIdentity;
use crate::platform::{self, PlatformMask};
use crate::recipe::{PackageScript, SourceKind};
use crate::version::{self, VersionNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

pub const CACHE_FILE: &str = "cache.json";

#[derive(Debug, Deserialize)]
struct GithubRelease {
    id: u64,
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    tarball_url: Option<String>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct GithubTag {
    name: String,
    tarball_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// File uploaded to the release
    Binary,
    /// GitHub-generated source tarball
    Tarball,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub release_id: u64,
    pub tag: String,
    pub version: VersionNumber,
    #[serde(default)]
    pub prerelease: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub release_id: u64,
    pub tag: String,
    pub version: VersionNumber,
    pub url: String,
    pub platform_mask: PlatformMask,
    pub filename: String,
    pub kind: AssetKind,
}

/// On-disk shape of `cache.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCache {
    pub fetched_at: DateTime<Utc>,
    pub releases: Vec<ReleaseInfo>,
    pub assets: Vec<ReleaseAsset>,
}

impl CatalogCache {
    fn is_fresh(&self, ttl: std::time::Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.fetched_at)
            .to_std()
            .map(|age| age < ttl)
            .unwrap_or(false)
    }
}

/// Where a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Network,
    /// Provider failed; an expired cache was used instead
    StaleCache,
}

#[derive(Debug, Clone)]
pub struct Listing {
    pub assets: Vec<ReleaseAsset>,
    pub origin: Origin,
}

pub struct ReleaseCatalog<'a> {
    ctx: &'a Context,
    identity: &'a PackageIdentity,
    cache_path: PathBuf,
}

impl<'a> ReleaseCatalog<'a> {
    pub fn new(ctx: &'a Context, identity: &'a PackageIdentity) -> Self {
        let cache_path = ctx.config.install_folder(identity).join(CACHE_FILE);
        Self {
            ctx,
            identity,
            cache_path,
        }
    }

    pub fn cache_path(&self) -> &PathBuf {
        &self.cache_path
    }

    /// Cached catalog, if present and readable.
    pub fn read_cache(&self) -> Option<CatalogCache> {
        let content = std::fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str(&content) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!("Ignoring unreadable {}: {}", self.cache_path.display(), e);
                None
            }
        }
    }

    pub async fn list_releases(&self, force_refresh: bool) -> Result<Listing> {
        let cached = self.read_cache();

        if !force_refresh {
            if let Some(cache) = &cached {
                if cache.is_fresh(self.ctx.config.cache_ttl) {
                    tracing::debug!("Using cached releases for {}", self.identity);
                    return Ok(Listing {
                        assets: cache.assets.clone(),
                        origin: Origin::Cache,
                    });
                }
            }
        }

        match self.fetch_remote().await {
            Ok(fresh) => {
                let json = serde_json::to_vec_pretty(&fresh)?;
                fsutil::write_atomic(&self.cache_path, &json)?;
                Ok(Listing {
                    assets: fresh.assets,
                    origin: Origin::Network,
                })
            }
            Err(err @ MorlockError::ProviderUnavailable { .. }) if !force_refresh => match cached {
                Some(cache) => {
                    self.ctx.reporter.warn(&format!(
                        "{err}; using cached release list from {}",
                        cache.fetched_at.format("%Y-%m-%d %H:%M UTC")
                    ));
                    Ok(Listing {
                        assets: cache.assets,
                        origin: Origin::StaleCache,
                    })
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn fetch_remote(&self) -> Result<CatalogCache> {
        let base = format!(
            "{}/repos/{}/{}",
            self.ctx.config.api_url.trim_end_matches('/'),
            self.identity.host,
            self.identity.repo
        );

        let text = self.get(&format!("{base}/releases?per_page=100")).await?;
        let releases: Vec<GithubRelease> =
            serde_json::from_str(&text).map_err(|e| self.unavailable(e))?;
        let releases: Vec<GithubRelease> = releases.into_iter().filter(|r| !r.draft).collect();

        if !releases.is_empty() {
            return Ok(self.flatten_releases(releases));
        }

        tracing::debug!("{} has no releases, falling back to tags", self.identity);
        let text = self.get(&format!("{base}/tags?per_page=100")).await?;
        let tags: Vec<GithubTag> = serde_json::from_str(&text).map_err(|e| self.unavailable(e))?;
        Ok(self.flatten_tags(tags))
    }

    async fn get(&self, url: &str) -> Result<String> {
        self.ctx.fetcher.get_text(url).await.map_err(|e| {
            if e.is_not_found() {
                MorlockError::RepoNotFound {
                    package: self.identity.repo_slug(),
                }
            } else {
                self.unavailable(e)
            }
        })
    }

    fn unavailable(&self, err: impl std::fmt::Display) -> MorlockError {
        MorlockError::ProviderUnavailable {
            package: self.identity.to_string(),
            message: err.to_string(),
        }
    }

    fn flatten_releases(&self, releases: Vec<GithubRelease>) -> CatalogCache {
        let mut infos = Vec::new();
        let mut assets = Vec::new();

        for release in releases {
            let Some(version) = version::version_from_tag(&release.tag_name, &self.identity.app_name)
            else {
                tracing::debug!("Skipping release tag '{}'", release.tag_name);
                continue;
            };

            for asset in &release.assets {
                if !is_installable(&asset.name) {
                    continue;
                }
                assets.push(ReleaseAsset {
                    release_id: release.id,
                    tag: release.tag_name.clone(),
                    version: version.clone(),
                    url: asset.browser_download_url.clone(),
                    platform_mask: PlatformMask::from_asset_name(&asset.name),
                    filename: asset.name.clone(),
                    kind: AssetKind::Binary,
                });
            }

            if let Some(url) = &release.tarball_url {
                assets.push(self.source_tarball(release.id, &release.tag_name, &version, url));
            }

            infos.push(ReleaseInfo {
                release_id: release.id,
                tag: release.tag_name,
                version,
                prerelease: release.prerelease,
            });
        }

        CatalogCache {
            fetched_at: Utc::now(),
            releases: infos,
            assets,
        }
    }

    fn flatten_tags(&self, tags: Vec<GithubTag>) -> CatalogCache {
        let mut infos = Vec::new();
        let mut assets = Vec::new();

        for tag in tags {
            let Some(version) = version::version_from_tag(&tag.name, &self.identity.app_name)
            else {
                continue;
            };
            assets.push(self.source_tarball(0, &tag.name, &version, &tag.tarball_url));
            infos.push(ReleaseInfo {
                release_id: 0,
                tag: tag.name,
                version,
                prerelease: false,
            });
        }

        CatalogCache {
            fetched_at: Utc::now(),
            releases: infos,
            assets,
        }
    }

    fn source_tarball(
        &self,
        release_id: u64,
        tag: &str,
        version: &VersionNumber,
        url: &str,
    ) -> ReleaseAsset {
        ReleaseAsset {
            release_id,
            tag: tag.to_string(),
            version: version.clone(),
            url: url.to_string(),
            platform_mask: PlatformMask::ALL,
            filename: format!("{}-{}.tar.gz", self.identity.repo, version),
            kind: AssetKind::Tarball,
        }
    }
}

/// Archive formats and bare executables the installer can unpack.
fn is_installable(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    if [".tar.gz", ".tgz", ".zip", ".exe"]
        .iter()
        .any(|ext| lower.ends_with(ext))
    {
        return true;
    }
    // Bare executables: no extension, or only a version-looking dotted tail
    match lower.rsplit_once('.') {
        None => true,
        Some((_, ext)) => {
            ext.chars().all(|c| c.is_ascii_digit())
                || !ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
    }
}

/// Narrow assets to what a recipe allows: its source kind and asset filter.
pub fn apply_recipe(assets: Vec<ReleaseAsset>, script: &PackageScript) -> Vec<ReleaseAsset> {
    let filter = script.asset.as_ref().map(|a| a.to_ascii_lowercase());
    assets
        .into_iter()
        .filter(|a| match script.source {
            SourceKind::Auto => true,
            SourceKind::Assets => a.kind == AssetKind::Binary,
            SourceKind::Tarball => a.kind == AssetKind::Tarball,
        })
        .filter(|a| match (&filter, a.kind) {
            (Some(needle), AssetKind::Binary) => a.filename.to_ascii_lowercase().contains(needle),
            _ => true,
        })
        .collect()
}

/// Distinct versions present in `assets`, ascending.
pub fn available_versions(assets: &[ReleaseAsset]) -> Vec<VersionNumber> {
    let mut versions: Vec<VersionNumber> = assets.iter().map(|a| a.version.clone()).collect();
    versions.sort();
    versions.dedup();
    versions
}

/// Pick the best asset for `platform` within `constraint`.
///
/// Candidates are ranked by version, then platform specificity, then CPU
/// architecture fit, then uploaded binaries over source tarballs.
pub fn select_release<'r>(
    package: &str,
    assets: &'r [ReleaseAsset],
    constraint: Option<&VersionNumber>,
    platform: PlatformMask,
) -> Result<&'r ReleaseAsset> {
    assets
        .iter()
        .filter(|a| a.platform_mask.contains(platform))
        .filter(|a| constraint.is_none_or(|c| c.is_compatible_with(&a.version)))
        .max_by(|a, b| rank(a, b))
        .ok_or_else(|| MorlockError::NoCompatibleRelease {
            package: package.to_string(),
            constraint: constraint.map(|c| c.to_string()),
            platform: platform.to_string(),
            available: available_versions(assets)
                .iter()
                .map(|v| v.to_string())
                .collect(),
        })
}

fn rank(a: &ReleaseAsset, b: &ReleaseAsset) -> Ordering {
    a.version
        .cmp(&b.version)
        .then_with(|| b.platform_mask.breadth().cmp(&a.platform_mask.breadth()))
        .then_with(|| platform::arch_score(&a.filename).cmp(&platform::arch_score(&b.filename)))
        .then_with(|| {
            let binary = |x: &ReleaseAsset| x.kind == AssetKind::Binary;
            binary(a).cmp(&binary(b))
        })
}
