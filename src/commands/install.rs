use crate::bootstrap;
use crate::commands::utils::{collect_failures, resolve_installed, resolve_spec};
use crate::config::Context;
use crate::error::Result;
use crate::installer::{InstallOptions, Installer};
use crate::registry::Registry;
use colored::Colorize;

pub async fn install(ctx: &Context, specs: &[String], refresh: bool) -> Result<()> {
    let installer = Installer::new(ctx);
    let options = InstallOptions {
        refresh,
        as_dependency: false,
    };

    let mut failures = Vec::new();
    for spec in specs {
        let outcome = match resolve_spec(ctx, spec) {
            Ok((identity, version)) => installer
                .install(&identity, version.as_ref(), &options)
                .await
                .map(|result| {
                    tracing::debug!(
                        "{} {} ready at {} in {}ms",
                        result.identity,
                        result.version,
                        result.path.display(),
                        result.time_ms
                    );
                }),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            if specs.len() > 1 {
                ctx.reporter.error(&format!("{spec}: {e}"));
            }
            failures.push((spec.clone(), e));
        }
    }

    if failures.len() < specs.len() && !ctx.config.bin_on_path() {
        bootstrap::print_path_hint(ctx);
    }
    collect_failures(failures, specs.len())
}

pub fn uninstall(ctx: &Context, specs: &[String]) -> Result<()> {
    let installer = Installer::new(ctx);

    let mut failures = Vec::new();
    for spec in specs {
        let outcome = resolve_installed(ctx, spec)
            .and_then(|(identity, version)| installer.uninstall(&identity, version.as_ref()));
        if let Err(e) = outcome {
            if specs.len() > 1 {
                ctx.reporter.error(&format!("{spec}: {e}"));
            }
            failures.push((spec.clone(), e));
        }
    }
    collect_failures(failures, specs.len())
}

/// Update one package, or every installed package when `spec` is `None`.
pub async fn update(ctx: &Context, spec: Option<&str>) -> Result<()> {
    let installer = Installer::new(ctx);

    let identities = match spec {
        Some(spec) => {
            let (identity, version) = resolve_installed(ctx, spec)?;
            if let Some(version) = version {
                tracing::warn!("Ignoring version {} for update of {}", version, identity);
            }
            vec![identity]
        }
        None => Registry::new(&ctx.config)
            .list_all()?
            .into_iter()
            .map(|record| record.identity)
            .collect(),
    };

    if identities.is_empty() {
        ctx.reporter.info("No packages installed");
        return Ok(());
    }

    let mut failures = Vec::new();
    let mut updated = 0;
    for identity in &identities {
        match installer.update(identity).await {
            Ok(result) if result.changed() => {
                updated += 1;
                println!(
                    "  {} {} {} -> {}",
                    "✓".green(),
                    result.identity.to_string().bold(),
                    result
                        .from_version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "(unlinked)".to_string())
                        .dimmed(),
                    result.to_version.to_string().cyan()
                );
            }
            Ok(result) => {
                tracing::debug!("{} is up to date at {}", result.identity, result.to_version);
            }
            Err(e) => {
                if identities.len() > 1 {
                    ctx.reporter.error(&format!("{identity}: {e}"));
                }
                failures.push((identity.to_string(), e));
            }
        }
    }

    if updated == 0 && failures.is_empty() {
        ctx.reporter.success("Everything is up to date");
    }
    collect_failures(failures, identities.len())
}
