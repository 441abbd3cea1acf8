use crate::config::Context;
use crate::error::Result;
use crate::registry::{PackageRecord, Registry};
use colored::Colorize;

pub fn list(ctx: &Context, json: bool) -> Result<()> {
    let records = Registry::new(&ctx.config).list_all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        ctx.reporter.info("No packages installed");
        return Ok(());
    }

    for line in format_records(&records) {
        println!("{line}");
    }
    Ok(())
}

/// One line per package: `owner/repo  1.0 [2.0]`, brackets marking the
/// active version.
fn format_records(records: &[PackageRecord]) -> Vec<String> {
    let width = records
        .iter()
        .map(|r| r.identity.to_string().len())
        .max()
        .unwrap_or(0);

    records
        .iter()
        .map(|record| {
            let name = format!("{:width$}", record.identity.to_string());
            let versions: Vec<String> = record
                .installed_versions
                .iter()
                .map(|v| {
                    if record.active_version.as_ref() == Some(v) {
                        format!("[{}]", v).green().to_string()
                    } else {
                        v.to_string()
                    }
                })
                .collect();
            format!("{}  {}", name.bold(), versions.join(" "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_info::PackageIdentity;
    use crate::version::VersionNumber;
    use std::path::PathBuf;

    #[test]
    fn test_format_marks_active_version() {
        colored::control::set_override(false);
        let v = |s: &str| VersionNumber::parse(s).unwrap();
        let records = vec![
            PackageRecord {
                identity: PackageIdentity::github("acme", "tool", "tool"),
                installed_versions: vec![v("1.0"), v("2.0")],
                active_version: Some(v("2.0")),
                install_folder: PathBuf::from("/m/packages/acme/tool/tool"),
                bin_folder: PathBuf::from("/m/bin"),
            },
            PackageRecord {
                identity: PackageIdentity::github("acme", "hammer", "hammer"),
                installed_versions: vec![v("0.3")],
                active_version: None,
                install_folder: PathBuf::from("/m/packages/acme/hammer/hammer"),
                bin_folder: PathBuf::from("/m/bin"),
            },
        ];

        let lines = format_records(&records);
        assert_eq!(lines[0], "acme/tool    1.0 [2.0]");
        assert_eq!(lines[1], "acme/hammer  0.3");
    }
}
