use crate::bootstrap;
use crate::config::Context;
use crate::error::Result;
use colored::Colorize;

pub async fn bootstrap(ctx: &Context) -> Result<()> {
    let report = bootstrap::run(ctx).await?;

    for (identity, version) in &report.installed {
        println!(
            "  {} {} {}",
            "✓".green(),
            identity.to_string().bold(),
            version.to_string().cyan()
        );
    }
    for identity in &report.skipped {
        println!(
            "  {} {} {}",
            "-".dimmed(),
            identity.to_string().bold(),
            "already installed".dimmed()
        );
    }
    Ok(())
}
