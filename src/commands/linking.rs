use crate::commands::utils::{collect_failures, resolve_installed};
use crate::config::Context;
use crate::error::Result;
use crate::installer::Installer;

pub fn link(ctx: &Context, specs: &[String]) -> Result<()> {
    let installer = Installer::new(ctx);

    let mut failures = Vec::new();
    for spec in specs {
        let outcome = resolve_installed(ctx, spec)
            .and_then(|(identity, version)| installer.link(&identity, version.as_ref()));
        if let Err(e) = outcome {
            if specs.len() > 1 {
                ctx.reporter.error(&format!("{spec}: {e}"));
            }
            failures.push((spec.clone(), e));
        }
    }
    collect_failures(failures, specs.len())
}

pub fn unlink(ctx: &Context, specs: &[String]) -> Result<()> {
    let installer = Installer::new(ctx);

    let mut failures = Vec::new();
    for spec in specs {
        let outcome = resolve_installed(ctx, spec).and_then(|(identity, version)| {
            if let Some(version) = version {
                tracing::debug!("unlink ignores version {}", version);
            }
            installer.unlink(&identity)
        });
        if let Err(e) = outcome {
            if specs.len() > 1 {
                ctx.reporter.error(&format!("{spec}: {e}"));
            }
            failures.push((spec.clone(), e));
        }
    }
    collect_failures(failures, specs.len())
}
