//! The install state machine and the operations built on it.
//!
//! An install walks these phases:
//!
//! ```text
//! RESOLVED -> DOWNLOADING -> UNPACKING -> BUILDING -> LINKING -> INSTALLED
//! ```
//!
//! Any phase may fail, and a failure leaves the package exactly as it was
//! before the install started:
//!
//! - downloads go to a temp file renamed into `archives/<version>/` only when
//!   complete and verified
//! - unpacking and building happen in `.staging-<version>/`, removed on any
//!   failure (including Ctrl-C)
//! - the staging folder is renamed to `<version>/` just before linking; if
//!   linking fails the version folder is removed again and the previous
//!   launcher is restored
//!
//! If a compatible version is already installed the install skips straight to
//! LINKING without touching the network, which makes repeated installs cheap
//! and offline-safe.

use crate::build::{BuildError, BuildRunner};
use crate::catalog::{self, Origin, ReleaseAsset, ReleaseCatalog};
use crate::config::Context;
use crate::download::{self, ARCHIVES_DIR};
use crate::error::{MorlockError, Result};
use crate::extract;
use crate::fsutil;
use crate::lock::PackageLock;
use crate::package_info::{PackageIdentity, PackageInfo};
use crate::platform::PlatformMask;
use crate::receipt::InstallReceipt;
use crate::recipe::PackageScript;
use crate::registry::{PackageRecord, Registry};
use crate::symlink;
use crate::version::VersionNumber;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    Resolved,
    Downloading,
    Unpacking,
    Building,
    Linking,
    Installed,
}

impl InstallPhase {
    fn step(self) -> usize {
        match self {
            InstallPhase::Resolved => 0,
            InstallPhase::Downloading => 1,
            InstallPhase::Unpacking => 2,
            InstallPhase::Building => 3,
            InstallPhase::Linking => 4,
            InstallPhase::Installed => 5,
        }
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallPhase::Resolved => "resolved",
            InstallPhase::Downloading => "downloading",
            InstallPhase::Unpacking => "unpacking",
            InstallPhase::Building => "building",
            InstallPhase::Linking => "linking",
            InstallPhase::Installed => "installed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Refetch the install script and release list
    pub refresh: bool,
    /// Installed on behalf of another package (bootstrap)
    pub as_dependency: bool,
}

/// Result of an install operation
#[derive(Debug, Clone, Serialize)]
pub struct InstallResult {
    pub identity: PackageIdentity,
    pub version: VersionNumber,
    /// Version folder
    pub path: PathBuf,
    /// Launcher in `bin/`
    pub launcher: PathBuf,
    /// The version was already present; nothing was downloaded
    pub already_installed: bool,
    /// Time taken (milliseconds)
    pub time_ms: u64,
}

/// Result of an uninstall operation
#[derive(Debug, Clone, Serialize)]
pub struct UninstallResult {
    pub identity: PackageIdentity,
    pub removed: Vec<VersionNumber>,
    /// Version now linked, if any remain
    pub active: Option<VersionNumber>,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub identity: PackageIdentity,
    pub from_version: Option<VersionNumber>,
    pub to_version: VersionNumber,
}

impl UpdateResult {
    pub fn changed(&self) -> bool {
        self.from_version.as_ref() != Some(&self.to_version)
    }
}

/// Removes a staging folder unless the install committed it.
struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> std::io::Result<Self> {
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(Self { path, armed: true })
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!("Failed to clean {}: {}", self.path.display(), e);
            }
        }
    }
}

pub struct Installer<'a> {
    ctx: &'a Context,
}

impl<'a> Installer<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub fn registry(&self) -> Registry<'a> {
        Registry::new(&self.ctx.config)
    }

    /// Install the best release of `identity` matching `constraint` and make
    /// it the active version.
    pub async fn install(
        &self,
        identity: &PackageIdentity,
        constraint: Option<&VersionNumber>,
        options: &InstallOptions,
    ) -> Result<InstallResult> {
        let start = Instant::now();
        let reporter = &self.ctx.reporter;
        let registry = self.registry();
        let package = identity.to_string();

        if options.as_dependency {
            reporter.info(&format!("Installing dependency {package}"));
        } else {
            reporter.header(&format!("Installing {package}"));
        }

        if !options.refresh {
            let installed = registry.list_installed(identity)?;
            let existing = installed
                .iter()
                .rev()
                .find(|v| constraint.is_none_or(|c| c.is_compatible_with(v)))
                .cloned();
            if let Some(version) = existing {
                tracing::debug!("{} {} already installed", package, version);
                return self.finish_existing(identity, &version, start);
            }
        }

        let info = PackageInfo::new(identity.clone(), &self.ctx.config);
        let lock = PackageLock::acquire(&info.install_folder, &package)?;
        let outcome = self.install_locked(&info, constraint, options, start).await;
        drop(lock);

        if outcome.is_err() {
            // Drop folders created for a package that never installed
            fsutil::prune_empty_dirs(&info.install_folder, &self.ctx.config.packages_dir());
        }
        outcome
    }

    async fn install_locked(
        &self,
        info: &PackageInfo,
        constraint: Option<&VersionNumber>,
        options: &InstallOptions,
        start: Instant,
    ) -> Result<InstallResult> {
        let identity = &info.identity;
        let package = identity.to_string();
        let registry = self.registry();

        let script = info.fetch_install_script(self.ctx, options.refresh).await?;
        let platform = PlatformMask::current();
        if !script.platform_mask().contains(platform) {
            return Err(MorlockError::UnsupportedPlatform {
                package,
                platform: platform.to_string(),
            });
        }

        let asset = self
            .resolve_release(identity, &script, constraint, options.refresh)
            .await?;
        let version = asset.version.clone();
        tracing::info!("Selected {} {} ({})", package, version, asset.filename);

        if registry.list_installed(identity)?.contains(&version) {
            return self.finish_existing(identity, &version, start);
        }

        let result = self.install_fresh(info, &script, &asset, options).await;
        self.ctx.reporter.phase_done(result.is_err());

        let launcher = result?;
        self.ctx
            .reporter
            .success(&format!("Installed {package} {version}"));
        Ok(InstallResult {
            identity: identity.clone(),
            path: registry.version_folder(identity, &version),
            version,
            launcher,
            already_installed: false,
            time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn finish_existing(
        &self,
        identity: &PackageIdentity,
        version: &VersionNumber,
        start: Instant,
    ) -> Result<InstallResult> {
        let launcher = self.activate(identity, version)?;
        self.ctx.reporter.info(&format!(
            "{identity} {version} is already installed"
        ));
        Ok(InstallResult {
            identity: identity.clone(),
            version: version.clone(),
            path: self.registry().version_folder(identity, version),
            launcher,
            already_installed: true,
            time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Select a release, refreshing a cached catalog once if nothing in it fits.
    async fn resolve_release(
        &self,
        identity: &PackageIdentity,
        script: &PackageScript,
        constraint: Option<&VersionNumber>,
        refresh: bool,
    ) -> Result<ReleaseAsset> {
        let package = identity.to_string();
        let platform = PlatformMask::current();
        let releases = ReleaseCatalog::new(self.ctx, identity);

        let listing = releases.list_releases(refresh).await?;
        let assets = catalog::apply_recipe(listing.assets, script);
        match catalog::select_release(&package, &assets, constraint, platform) {
            Ok(asset) => Ok(asset.clone()),
            Err(err) if listing.origin == Origin::Cache => {
                tracing::debug!("No match in cached releases for {}, refreshing", package);
                let listing = match releases.list_releases(true).await {
                    Ok(listing) => listing,
                    Err(refresh_err) => {
                        tracing::warn!("Refreshing releases for {} failed: {}", package, refresh_err);
                        return Err(err);
                    }
                };
                let assets = catalog::apply_recipe(listing.assets, script);
                catalog::select_release(&package, &assets, constraint, platform).cloned()
            }
            Err(err) => Err(err),
        }
    }

    /// DOWNLOADING through LINKING for a version not yet on disk.
    async fn install_fresh(
        &self,
        info: &PackageInfo,
        script: &PackageScript,
        asset: &ReleaseAsset,
        options: &InstallOptions,
    ) -> Result<PathBuf> {
        let identity = &info.identity;
        let package = identity.to_string();
        let version = asset.version.clone();
        let app = identity.app_name.as_str();
        let registry = self.registry();
        let reporter = &self.ctx.reporter;

        let fail = |phase: InstallPhase, message: String| {
            tracing::debug!("{} {} failed while {}: {}", package, version, phase, message);
            match phase {
                InstallPhase::Downloading => MorlockError::DownloadFailed {
                    package: package.clone(),
                    version: version.to_string(),
                    message,
                },
                InstallPhase::Unpacking => MorlockError::UnpackFailed {
                    package: package.clone(),
                    version: version.to_string(),
                    message,
                },
                InstallPhase::Linking => MorlockError::LinkFailed {
                    package: package.clone(),
                    version: version.to_string(),
                    message,
                },
                _ => MorlockError::BuildFailed {
                    package: package.clone(),
                    version: version.to_string(),
                    message,
                    output: String::new(),
                },
            }
        };
        let enter = |phase: InstallPhase| {
            tracing::debug!("{} {}: {}", package, version, phase);
            reporter.phase(phase.step(), InstallPhase::Installed.step());
        };

        enter(InstallPhase::Downloading);
        reporter.info(&format!("Downloading {}", asset.filename));
        let archive_dir = info
            .install_folder
            .join(ARCHIVES_DIR)
            .join(version.to_string());
        let checksum = script.checksum_for(&asset.filename);
        let archive = download::fetch_archive(
            self.ctx,
            &archive_dir,
            &asset.url,
            &asset.filename,
            checksum.as_deref(),
        )
        .await
        .map_err(|e| {
            fsutil::prune_empty_dirs(&archive_dir, &info.install_folder);
            fail(InstallPhase::Downloading, format!("{e:#}"))
        })?;

        enter(InstallPhase::Unpacking);
        let staging_path = info.install_folder.join(format!(".staging-{version}"));
        let mut staging = StagingGuard::new(staging_path.clone())
            .map_err(|e| fail(InstallPhase::Unpacking, e.to_string()))?;
        if let Err(e) = extract::unpack(&archive, &staging_path, app) {
            // A corrupt archive must not be reused by the next attempt
            let _ = fs::remove_file(&archive);
            fsutil::prune_empty_dirs(&archive_dir, &info.install_folder);
            return Err(fail(InstallPhase::Unpacking, format!("{e:#}")));
        }

        enter(InstallPhase::Building);
        if !script.steps.is_empty() {
            reporter.info(&format!("Building {package} {version}"));
        }
        BuildRunner::new(self.ctx, app, version.to_string(), &staging_path)
            .run_all(&script.steps)
            .await
            .map_err(|e| match e {
                BuildError::Interrupted => MorlockError::Interrupted,
                BuildError::Step { message, output } => MorlockError::BuildFailed {
                    package: package.clone(),
                    version: version.to_string(),
                    message,
                    output,
                },
            })?;

        let executable = find_executable(&staging_path, script.executable.as_deref(), app)
            .ok_or_else(|| {
                fail(
                    InstallPhase::Building,
                    format!("no executable named {app} found in the release"),
                )
            })?;

        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        InstallReceipt::new(identity, &version, &executable, !options.as_dependency)
            .with_asset(&asset.url, &archive_name)
            .write(&staging_path)
            .map_err(|e| fail(InstallPhase::Building, format!("{e:#}")))?;

        enter(InstallPhase::Linking);
        let previous = registry.active_version(identity);
        let version_dir = registry.version_folder(identity, &version);
        fs::rename(&staging_path, &version_dir)
            .map_err(|e| fail(InstallPhase::Linking, format!("failed to commit version folder: {e}")))?;
        staging.disarm();

        match self.activate(identity, &version) {
            Ok(launcher) => Ok(launcher),
            Err(err) => {
                if let Err(e) = fs::remove_dir_all(&version_dir) {
                    tracing::warn!("Failed to roll back {}: {}", version_dir.display(), e);
                }
                self.restore_previous(identity, previous);
                Err(err)
            }
        }
    }

    /// Point the launcher at `version` and record it as active.
    fn activate(&self, identity: &PackageIdentity, version: &VersionNumber) -> Result<PathBuf> {
        let registry = self.registry();
        let version_dir = registry.version_folder(identity, version);
        let link_failed = |message: String| MorlockError::LinkFailed {
            package: identity.to_string(),
            version: version.to_string(),
            message,
        };

        let executable = InstallReceipt::read(&version_dir)
            .ok()
            .map(|r| r.executable)
            .filter(|rel| fsutil::safe_join(&version_dir, rel).is_some_and(|p| p.is_file()))
            .or_else(|| find_executable(&version_dir, None, &identity.app_name))
            .ok_or_else(|| link_failed(format!("no executable found in {}", version_dir.display())))?;
        let target = version_dir.join(&executable);

        let launcher = symlink::link_launcher(&self.ctx.config, &identity.app_name, &target)
            .map_err(|e| match e {
                MorlockError::PermissionDenied { .. } => e,
                other => link_failed(other.to_string()),
            })?;
        registry
            .set_active(identity, version)
            .map_err(|e| link_failed(e.to_string()))?;

        tracing::debug!("Linked {} -> {}", launcher.display(), target.display());
        Ok(launcher)
    }

    /// Best-effort return to the previously active version after a failed link.
    fn restore_previous(&self, identity: &PackageIdentity, previous: Option<VersionNumber>) {
        let result = match previous {
            Some(version) => self.activate(identity, &version).map(|_| ()),
            None => self.deactivate(identity).map(|_| ()),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to restore launcher for {}: {}", identity, e);
        }
    }

    fn deactivate(&self, identity: &PackageIdentity) -> Result<bool> {
        let folder = self.ctx.config.install_folder(identity);
        let removed = symlink::unlink_launcher(&self.ctx.config, &identity.app_name, &folder)?;
        self.registry().clear_active(identity)?;
        Ok(removed)
    }

    fn not_installed(identity: &PackageIdentity) -> MorlockError {
        MorlockError::NotInstalled {
            package: identity.to_string(),
            suggestion: None,
        }
    }

    /// Remove one version, or every version when `version` is `None`.
    pub fn uninstall(
        &self,
        identity: &PackageIdentity,
        version: Option<&VersionNumber>,
    ) -> Result<UninstallResult> {
        let start = Instant::now();
        let registry = self.registry();
        let folder = self.ctx.config.install_folder(identity);
        let installed = registry.list_installed(identity)?;
        if installed.is_empty() {
            return Err(Self::not_installed(identity));
        }

        let lock = PackageLock::acquire(&folder, &identity.to_string())?;

        let Some(version) = version else {
            self.deactivate(identity)?;
            remove_package_contents(&folder)?;
            drop(lock);
            fsutil::prune_empty_dirs(&folder, &self.ctx.config.packages_dir());
            self.ctx
                .reporter
                .success(&format!("Uninstalled {identity}"));
            return Ok(UninstallResult {
                identity: identity.clone(),
                removed: installed.into_iter().collect(),
                active: None,
                time_ms: start.elapsed().as_millis() as u64,
            });
        };

        // Exact version first, otherwise the one installed version it matches
        let version = if installed.contains(version) {
            version.clone()
        } else {
            let matches: Vec<&VersionNumber> = installed
                .iter()
                .filter(|v| version.is_compatible_with(v))
                .collect();
            match matches.as_slice() {
                [only] => (*only).clone(),
                [] => {
                    return Err(MorlockError::NotInstalled {
                        package: format!("{identity}@{version}"),
                        suggestion: None,
                    });
                }
                _ => {
                    return Err(MorlockError::AmbiguousPackageName {
                        name: format!("{identity}@{version}"),
                        candidates: matches.iter().map(|v| format!("{identity}@{v}")).collect(),
                    });
                }
            }
        };
        let version = &version;

        let active = registry.active_version(identity);
        let remaining: Vec<&VersionNumber> = installed.iter().filter(|v| *v != version).collect();
        let version_dir = registry.version_folder(identity, version);
        let launcher = symlink::launcher_path(&self.ctx.config, &identity.app_name);
        let launcher_in_version = symlink::launcher_target(&launcher)
            .is_some_and(|target| target.starts_with(&version_dir));

        // Move the launcher off this version before deleting it
        let new_active = if active.as_ref() == Some(version) || launcher_in_version {
            match remaining.last() {
                Some(next) => {
                    self.activate(identity, next)?;
                    Some((*next).clone())
                }
                None => {
                    self.deactivate(identity)?;
                    None
                }
            }
        } else {
            active
        };

        fs::remove_dir_all(&version_dir)?;
        let archive_dir = folder.join(ARCHIVES_DIR).join(version.to_string());
        if archive_dir.exists() {
            fs::remove_dir_all(&archive_dir)?;
        }
        fsutil::prune_empty_dirs(&folder.join(ARCHIVES_DIR), &folder);
        drop(lock);

        let message = match &new_active {
            Some(v) => format!("Uninstalled {identity} {version}; {v} is now active"),
            None => format!("Uninstalled {identity} {version}"),
        };
        self.ctx.reporter.success(&message);

        Ok(UninstallResult {
            identity: identity.clone(),
            removed: vec![version.clone()],
            active: new_active,
            time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Link the highest installed version compatible with `version`, or the
    /// current/highest version when `None`.
    pub fn link(
        &self,
        identity: &PackageIdentity,
        version: Option<&VersionNumber>,
    ) -> Result<PackageRecord> {
        let registry = self.registry();
        let installed = registry.list_installed(identity)?;
        if installed.is_empty() {
            return Err(Self::not_installed(identity));
        }

        let chosen = match version {
            Some(wanted) => installed
                .iter()
                .rev()
                .find(|v| wanted.is_compatible_with(v))
                .cloned()
                .ok_or_else(|| MorlockError::NotInstalled {
                    package: format!("{identity}@{wanted}"),
                    suggestion: None,
                })?,
            None => registry
                .active_version(identity)
                .or_else(|| installed.iter().next_back().cloned())
                .ok_or_else(|| Self::not_installed(identity))?,
        };

        let launcher = self.activate(identity, &chosen)?;
        self.ctx.reporter.success(&format!(
            "Linked {} {} -> {}",
            identity,
            chosen,
            launcher.display()
        ));
        registry.record(identity)
    }

    /// Remove the launcher, keeping every installed version.
    pub fn unlink(&self, identity: &PackageIdentity) -> Result<PackageRecord> {
        let registry = self.registry();
        if registry.list_installed(identity)?.is_empty() {
            return Err(Self::not_installed(identity));
        }
        if self.deactivate(identity)? {
            self.ctx.reporter.success(&format!("Unlinked {identity}"));
        } else {
            self.ctx
                .reporter
                .info(&format!("{identity} was not linked"));
        }
        registry.record(identity)
    }

    /// Refresh the script and releases, then install and link the newest
    /// release. Installed versions stay usable if the provider is down.
    pub async fn update(&self, identity: &PackageIdentity) -> Result<UpdateResult> {
        let registry = self.registry();
        let installed = registry.list_installed(identity)?;
        let Some(highest) = installed.iter().next_back() else {
            return Err(Self::not_installed(identity));
        };
        let from_version = registry.active_version(identity);

        let as_dependency = InstallReceipt::read(&registry.version_folder(identity, highest))
            .map(|r| r.installed_as_dependency)
            .unwrap_or(false);

        let options = InstallOptions {
            refresh: true,
            as_dependency,
        };
        let result = self.install(identity, None, &options).await?;

        Ok(UpdateResult {
            identity: identity.clone(),
            from_version,
            to_version: result.version,
        })
    }
}

/// Launcher target relative to `root`: the recipe's `executable`, then
/// `bin/<app>`, then the shallowest file named `<app>` anywhere below.
pub fn find_executable(root: &Path, declared: Option<&str>, app: &str) -> Option<String> {
    if let Some(declared) = declared {
        return fsutil::safe_join(root, declared)
            .filter(|p| p.is_file())
            .map(|_| declared.trim_start_matches("./").replace('\\', "/"));
    }

    let names: Vec<String> = if cfg!(windows) {
        vec![format!("{app}.exe"), format!("{app}.cmd"), format!("{app}.bat")]
    } else {
        vec![app.to_string()]
    };

    for name in &names {
        if root.join("bin").join(name).is_file() {
            return Some(format!("bin/{name}"));
        }
    }

    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| names.iter().any(|n| e.file_name().to_string_lossy() == n.as_str()))
        .min_by_key(|e| e.depth())
        .and_then(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
}

/// Remove everything in a package folder except the developer's `local-script`.
fn remove_package_contents(folder: &Path) -> Result<()> {
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == crate::package_info::LOCAL_SCRIPT_FILE || name == crate::lock::LOCK_FILE {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
