//! Package name resolution and install-script lookup.
//!
//! A user names a package as `app`, `owner/repo`, `owner/repo/app`, an
//! optional `github/` (or `github.com/`) prefix on either of those, or a full
//! `https://github.com/owner/repo` URL. Resolution turns that into a
//! [`PackageIdentity`], which fixes the on-disk location
//! `packages/<host>/<repo>/<app>/` for the rest of the invocation.
//!
//! The install script is looked up in this order:
//!
//! 1. `<install_folder>/local-script`, a developer override
//! 2. the cached `<install_folder>/install.script` (skipped on refresh)
//! 3. `<raw_url>/<host>/<repo>/HEAD/morlock/<app>.toml`, cached on success
//!
//! If the remote fetch fails for a reason other than 404 and a cached copy
//! exists, the cached copy is used so reinstalls work offline.

use crate::config::{Config, Context};
use crate::error::{MorlockError, Result};
use crate::fsutil;
use crate::recipe::PackageScript;
use crate::version::VersionNumber;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const LOCAL_SCRIPT_FILE: &str = "local-script";
pub const CACHED_SCRIPT_FILE: &str = "install.script";

const PROVIDER_ALIASES: &[&str] = &["github", "gh", "github.com", "www.github.com"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    /// Release provider; always "github" today
    pub provider: String,
    /// Account that owns the repository
    pub host: String,
    pub repo: String,
    pub app_name: String,
}

impl PackageIdentity {
    pub fn github(host: &str, repo: &str, app_name: &str) -> Self {
        Self {
            provider: "github".to_string(),
            host: host.to_string(),
            repo: repo.to_string(),
            app_name: app_name.to_string(),
        }
    }

    /// `host/repo`
    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.host, self.repo)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.app_name == self.repo {
            write!(f, "{}/{}", self.host, self.repo)
        } else {
            write!(f, "{}/{}/{}", self.host, self.repo, self.app_name)
        }
    }
}

/// A name as typed by the user, before consulting installed packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageName {
    /// Bare app name; must be matched against known packages
    App(String),
    Qualified(PackageIdentity),
}

/// Split `name@version` into its parts.
pub fn split_version(spec: &str) -> Result<(&str, Option<VersionNumber>)> {
    match spec.rsplit_once('@') {
        Some((name, version)) if !name.is_empty() => {
            Ok((name, Some(VersionNumber::parse(version)?)))
        }
        Some(_) => Err(unrecognized(spec, "missing package name before '@'")),
        None => Ok((spec, None)),
    }
}

/// Parse a package name or GitHub URL without consulting installed state.
pub fn parse_name(input: &str) -> Result<PackageName> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(unrecognized(input, "empty name"));
    }

    let segments: Vec<String> = if trimmed.contains("://") {
        let url = reqwest::Url::parse(trimmed)
            .map_err(|e| unrecognized(input, &format!("invalid URL: {e}")))?;
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !PROVIDER_ALIASES.contains(&host.as_str()) {
            return Err(unrecognized(input, &format!("unsupported provider '{host}'")));
        }
        let segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        if segments.len() < 2 {
            return Err(unrecognized(input, "URL must name an owner and a repository"));
        }
        segments
    } else {
        let mut segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.len() > 1 && PROVIDER_ALIASES.contains(&segments[0].to_ascii_lowercase().as_str())
        {
            segments.remove(0);
        }
        segments
    };

    if segments.len() > 3 {
        return Err(unrecognized(input, "too many path segments"));
    }
    for segment in &segments {
        validate_segment(input, segment)?;
    }

    let repo_of = |s: &str| s.strip_suffix(".git").unwrap_or(s).to_string();
    match segments.as_slice() {
        [app] => Ok(PackageName::App(app.clone())),
        [host, repo] => {
            let repo = repo_of(repo);
            Ok(PackageName::Qualified(PackageIdentity::github(host, &repo, &repo)))
        }
        [host, repo, app] => Ok(PackageName::Qualified(PackageIdentity::github(
            host,
            &repo_of(repo),
            app,
        ))),
        _ => Err(unrecognized(input, "empty name")),
    }
}

/// Resolve a name against installed packages and well-known aliases.
///
/// A bare app name must match exactly one installed package or alias.
pub fn resolve(
    input: &str,
    installed: &[PackageIdentity],
    aliases: &[PackageIdentity],
) -> Result<PackageIdentity> {
    match parse_name(input)? {
        PackageName::Qualified(identity) => Ok(identity),
        PackageName::App(app) => {
            let mut matches: Vec<&PackageIdentity> = installed
                .iter()
                .filter(|id| id.app_name.eq_ignore_ascii_case(&app))
                .collect();
            matches.sort();
            matches.dedup();

            match matches.as_slice() {
                [one] => Ok((*one).clone()),
                [] => aliases
                    .iter()
                    .find(|id| id.app_name.eq_ignore_ascii_case(&app))
                    .cloned()
                    .ok_or_else(|| {
                        unrecognized(input, "not installed; name it as owner/repo or owner/repo/app")
                    }),
                many => Err(MorlockError::AmbiguousPackageName {
                    name: input.to_string(),
                    candidates: many.iter().map(|id| id.to_string()).collect(),
                }),
            }
        }
    }
}

fn validate_segment(input: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(unrecognized(input, "empty path segment"));
    }
    if segment == "." || segment == ".." {
        return Err(unrecognized(input, "relative path segments are not allowed"));
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(unrecognized(input, &format!("disallowed character '{bad}'")));
    }
    Ok(())
}

fn unrecognized(name: &str, reason: &str) -> MorlockError {
    MorlockError::UnrecognizedPackageName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Identity plus the install script, resolved for one invocation.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub identity: PackageIdentity,
    pub install_folder: PathBuf,
}

impl PackageInfo {
    pub fn new(identity: PackageIdentity, config: &Config) -> Self {
        let install_folder = config.install_folder(&identity);
        Self {
            identity,
            install_folder,
        }
    }

    pub fn script_url(&self, config: &Config) -> String {
        format!(
            "{}/{}/{}/HEAD/morlock/{}.toml",
            config.raw_url.trim_end_matches('/'),
            self.identity.host,
            self.identity.repo,
            self.identity.app_name
        )
    }

    pub fn local_script_path(&self) -> PathBuf {
        self.install_folder.join(LOCAL_SCRIPT_FILE)
    }

    pub fn cached_script_path(&self) -> PathBuf {
        self.install_folder.join(CACHED_SCRIPT_FILE)
    }

    /// Load the install script, fetching it when needed.
    pub async fn fetch_install_script(&self, ctx: &Context, refresh: bool) -> Result<PackageScript> {
        let package = self.identity.to_string();

        let local = self.local_script_path();
        if local.is_file() {
            tracing::debug!("Using local script override {}", local.display());
            let text = std::fs::read_to_string(&local)?;
            return PackageScript::parse(&text, &package);
        }

        let cached = self.cached_script_path();
        if !refresh && cached.is_file() {
            tracing::debug!("Using cached script {}", cached.display());
            let text = std::fs::read_to_string(&cached)?;
            return PackageScript::parse(&text, &package);
        }

        let url = self.script_url(&ctx.config);
        match ctx.fetcher.get_text(&url).await {
            Ok(text) => {
                let script = PackageScript::parse(&text, &package)?;
                fsutil::write_atomic(&cached, text.as_bytes())?;
                Ok(script)
            }
            Err(err) if err.is_not_found() => {
                Err(MorlockError::ScriptNotFound { package, url })
            }
            Err(err) if cached.is_file() => {
                ctx.reporter.warn(&format!(
                    "Could not refresh install script for {package} ({err}); using cached copy"
                ));
                let text = std::fs::read_to_string(&cached)?;
                PackageScript::parse(&text, &package)
            }
            Err(err) => Err(MorlockError::ProviderUnavailable {
                package,
                message: err.to_string(),
            }),
        }
    }
}
