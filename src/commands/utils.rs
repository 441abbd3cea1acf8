//! Shared helpers for command implementations

use crate::bootstrap;
use crate::config::Context;
use crate::error::{MorlockError, Result};
use crate::package_info::{self, PackageIdentity};
use crate::registry::Registry;
use crate::version::VersionNumber;

/// Resolve `name[@version]` for installing. Unknown bare names fall back to
/// the bootstrap aliases.
pub(crate) fn resolve_spec(
    ctx: &Context,
    spec: &str,
) -> Result<(PackageIdentity, Option<VersionNumber>)> {
    let (name, version) = package_info::split_version(spec)?;
    let installed = installed_identities(ctx)?;
    let identity = package_info::resolve(name, &installed, &bootstrap::aliases())?;
    Ok((identity, version))
}

/// Resolve `name[@version]` for a package that must already be installed.
pub(crate) fn resolve_installed(
    ctx: &Context,
    spec: &str,
) -> Result<(PackageIdentity, Option<VersionNumber>)> {
    let (name, version) = package_info::split_version(spec)?;
    let installed = installed_identities(ctx)?;

    let identity = match package_info::resolve(name, &installed, &[]) {
        Ok(identity) => identity,
        Err(MorlockError::UnrecognizedPackageName { .. })
            if matches!(
                package_info::parse_name(name),
                Ok(package_info::PackageName::App(_))
            ) =>
        {
            return Err(not_installed(name, &installed));
        }
        Err(e) => return Err(e),
    };

    if !installed.contains(&identity) {
        return Err(not_installed(name, &installed));
    }
    Ok((identity, version))
}

fn installed_identities(ctx: &Context) -> Result<Vec<PackageIdentity>> {
    Ok(Registry::new(&ctx.config)
        .list_all()?
        .into_iter()
        .map(|record| record.identity)
        .collect())
}

fn not_installed(name: &str, installed: &[PackageIdentity]) -> MorlockError {
    let candidates: Vec<String> = installed
        .iter()
        .flat_map(|id| [id.app_name.clone(), id.to_string()])
        .collect();
    MorlockError::NotInstalled {
        package: name.to_string(),
        suggestion: closest_name(name, &candidates),
    }
}

/// The candidate closest to `name` by edit distance, if any is close enough.
pub(crate) fn closest_name(name: &str, candidates: &[String]) -> Option<String> {
    let name = name.to_ascii_lowercase();
    candidates
        .iter()
        .map(|c| (strsim::levenshtein(&name, &c.to_ascii_lowercase()), c))
        .filter(|(distance, _)| *distance > 0 && *distance <= 3 && *distance < name.len())
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, c)| c.clone())
}

/// Collapse per-package failures: the only failure as-is, or a summary when
/// several failed.
pub(crate) fn collect_failures(mut failures: Vec<(String, MorlockError)>, total: usize) -> Result<()> {
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0).1),
        n => Err(MorlockError::Other(anyhow::anyhow!(
            "{} of {} packages failed: {}",
            n,
            total,
            failures
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
