//! Per-invocation configuration and the shared component context.
//!
//! Everything Morlock needs to know about its environment is read once by
//! [`Config::from_env`] and handed to components through [`Context`]. Nothing
//! here is global; tests build a `Config` rooted in a temporary directory.

use crate::api::Fetcher;
use crate::package_info::PackageIdentity;
use crate::reporter::Reporter;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_RAW_URL: &str = "https://raw.githubusercontent.com";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of all durable state (`MORLOCK_HOME`)
    pub home: PathBuf,
    /// GitHub REST API base URL
    pub api_url: String,
    /// Raw content base URL for install scripts
    pub raw_url: String,
    pub github_token: Option<String>,
    /// Age after which `cache.json` is refreshed
    pub cache_ttl: Duration,
    /// Prompts and privilege elevation are allowed
    pub interactive: bool,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let home = match std::env::var_os("MORLOCK_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => user_home()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".morlock"),
        };

        let cache_ttl = std::env::var("MORLOCK_CACHE_TTL")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL);

        let github_token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GH_TOKEN"))
            .ok()
            .filter(|t| !t.trim().is_empty());

        let interactive = std::io::stdin().is_terminal()
            && std::io::stdout().is_terminal()
            && std::env::var_os("CI").is_none();

        Self {
            home,
            api_url: env_or("MORLOCK_API_URL", DEFAULT_API_URL),
            raw_url: env_or("MORLOCK_RAW_URL", DEFAULT_RAW_URL),
            github_token,
            cache_ttl,
            interactive,
        }
    }

    /// Defaults rooted at `home`, non-interactive.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            api_url: DEFAULT_API_URL.to_string(),
            raw_url: DEFAULT_RAW_URL.to_string(),
            github_token: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            interactive: false,
        }
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.home.join("packages")
    }

    /// Shared launcher folder that belongs on `PATH`
    pub fn bin_dir(&self) -> PathBuf {
        self.home.join("bin")
    }

    /// `packages/<host>/<repo>/<app>/`
    pub fn install_folder(&self, identity: &PackageIdentity) -> PathBuf {
        self.packages_dir()
            .join(&identity.host)
            .join(&identity.repo)
            .join(&identity.app_name)
    }

    /// Whether the launcher folder is already listed in `PATH`.
    pub fn bin_on_path(&self) -> bool {
        let bin = self.bin_dir();
        std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).any(|p| same_dir(&p, &bin)))
            .unwrap_or(false)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// The user's home folder: `HOME`, then `HOMEDRIVE`+`HOMEPATH`, then the
/// platform default.
pub fn user_home() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        return Some(PathBuf::from(home));
    }
    if let (Some(drive), Some(path)) = (std::env::var_os("HOMEDRIVE"), std::env::var_os("HOMEPATH"))
    {
        let mut joined = drive;
        joined.push(path);
        return Some(PathBuf::from(joined));
    }
    dirs::home_dir()
}

/// Shell rc file and the line that puts `bin` on `PATH` for the given `SHELL`.
pub fn shell_setup_hint(bin: &Path, shell: Option<&str>) -> (String, String) {
    let shell_name = shell
        .and_then(|s| Path::new(s).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("");

    match shell_name {
        "zsh" => (
            "~/.zshrc".to_string(),
            format!("export PATH=\"{}:$PATH\"", bin.display()),
        ),
        "bash" => (
            "~/.bashrc".to_string(),
            format!("export PATH=\"{}:$PATH\"", bin.display()),
        ),
        "fish" => (
            "~/.config/fish/config.fish".to_string(),
            format!("fish_add_path {}", bin.display()),
        ),
        _ if cfg!(windows) => (
            "your user environment variables".to_string(),
            format!("setx PATH \"%PATH%;{}\"", bin.display()),
        ),
        _ => (
            "~/.profile".to_string(),
            format!("export PATH=\"{}:$PATH\"", bin.display()),
        ),
    }
}

/// Components shared by every operation of one invocation.
#[derive(Clone)]
pub struct Context {
    pub config: Config,
    pub fetcher: Arc<dyn Fetcher>,
    pub reporter: Arc<dyn Reporter>,
}

impl Context {
    pub fn new(config: Config, fetcher: Arc<dyn Fetcher>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            fetcher,
            reporter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PackageIdentity {
        PackageIdentity {
            provider: "github".to_string(),
            host: "acme".to_string(),
            repo: "tools".to_string(),
            app_name: "tool".to_string(),
        }
    }

    #[test]
    fn test_layout() {
        let config = Config::with_home("/tmp/morlock-home");
        assert_eq!(config.bin_dir(), PathBuf::from("/tmp/morlock-home/bin"));
        assert_eq!(
            config.install_folder(&identity()),
            PathBuf::from("/tmp/morlock-home/packages/acme/tools/tool")
        );
    }

    #[test]
    fn test_shell_setup_hint() {
        let bin = Path::new("/home/u/.morlock/bin");
        let (rc, line) = shell_setup_hint(bin, Some("/usr/bin/zsh"));
        assert_eq!(rc, "~/.zshrc");
        assert!(line.contains("/home/u/.morlock/bin"));

        let (rc, line) = shell_setup_hint(bin, Some("/usr/local/bin/fish"));
        assert_eq!(rc, "~/.config/fish/config.fish");
        assert!(line.starts_with("fish_add_path"));

        let (rc, _) = shell_setup_hint(bin, Some("/bin/bash"));
        assert_eq!(rc, "~/.bashrc");
    }

    #[test]
    fn test_with_home_is_not_interactive() {
        let config = Config::with_home("/x");
        assert!(!config.interactive);
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }
}
