//! Self-installation of morlock and its toolchain.
//!
//! Bootstrap installs the Rogue compiler and the Rogo build tool as
//! dependency installs, then morlock itself, all through the regular
//! [`Installer`]. Each target is independent: targets already present are
//! skipped, and an interrupted bootstrap can simply be run again.

use crate::config::{self, Context};
use crate::error::Result;
use crate::installer::{InstallOptions, Installer};
use crate::package_info::PackageIdentity;
use crate::version::VersionNumber;

const BOOTSTRAP_OWNER: &str = "abepralle";

/// (repo, installed as a dependency)
const TARGETS: &[(&str, bool)] = &[("rogue", true), ("rogo", true), ("morlock", false)];

/// Identities reachable by bare name even before they are installed.
pub fn aliases() -> Vec<PackageIdentity> {
    TARGETS
        .iter()
        .map(|(repo, _)| PackageIdentity::github(BOOTSTRAP_OWNER, repo, repo))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub installed: Vec<(PackageIdentity, VersionNumber)>,
    pub skipped: Vec<PackageIdentity>,
}

pub async fn run(ctx: &Context) -> Result<BootstrapReport> {
    let installer = Installer::new(ctx);
    let registry = installer.registry();
    let mut report = BootstrapReport::default();

    ctx.reporter.header("Bootstrapping morlock");

    for (repo, as_dependency) in TARGETS {
        let identity = PackageIdentity::github(BOOTSTRAP_OWNER, repo, repo);
        if !registry.list_installed(&identity)?.is_empty() {
            tracing::debug!("{} already installed, skipping", identity);
            report.skipped.push(identity);
            continue;
        }

        let options = InstallOptions {
            refresh: false,
            as_dependency: *as_dependency,
        };
        let result = installer.install(&identity, None, &options).await?;
        report.installed.push((identity, result.version));
    }

    if !ctx.config.bin_on_path() {
        print_path_hint(ctx);
    }

    Ok(report)
}

/// Tell the user how to put `bin/` on `PATH` for their shell.
pub fn print_path_hint(ctx: &Context) {
    let bin = ctx.config.bin_dir();
    let shell = std::env::var("SHELL").ok();
    let (rc, line) = config::shell_setup_hint(&bin, shell.as_deref());
    ctx.reporter.warn(&format!(
        "{} is not on your PATH. Add this line to {}:\n    {}",
        bin.display(),
        rc,
        line
    ));
}
