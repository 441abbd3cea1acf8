//! HTTP access to GitHub: the release API, raw install scripts and asset downloads.
//!
//! All network traffic goes through the [`Fetcher`] trait so the installer can
//! be driven by an in-memory fake in tests. [`HttpFetcher`] is the `reqwest`
//! implementation used by the CLI.
//!
//! # Timeouts
//!
//! - Connecting: 10 seconds
//! - Text requests (API, scripts): 30 seconds end to end
//! - Downloads: no overall limit, but 60 seconds without a single chunk fails
//!   the transfer so a stalled connection never hangs forever
//!
//! # Authentication
//!
//! When a GitHub token is configured it is sent as a bearer token to the API
//! host only; raw content and asset downloads go out anonymously.

use async_trait::async_trait;
use indicatif::ProgressBar;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const STALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("rate limit exceeded for {url}")]
    RateLimited { url: String },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }

    fn network(url: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET a text resource; any non-success status is an error.
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;

    /// Stream `url` into `dest`, creating or truncating it. Returns the byte count.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressBar,
    ) -> Result<u64, FetchError>;
}

/// `reqwest`-backed fetcher with redirect following and optional API auth.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    api_url: Option<Url>,
    github_token: Option<String>,
}

impl HttpFetcher {
    pub fn new(api_url: &str, github_token: Option<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(format!("morlock/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::network(api_url, e))?;

        Ok(Self {
            client,
            api_url: Url::parse(api_url).ok(),
            github_token,
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if self.is_api_url(url) {
            request = request.header(reqwest::header::ACCEPT, "application/vnd.github+json");
            if let Some(token) = &self.github_token {
                request = request.bearer_auth(token);
            }
        }
        request
    }

    /// Same scheme, host and port as the API base, under its path.
    fn is_api_url(&self, url: &str) -> bool {
        let (Some(base), Ok(url)) = (&self.api_url, Url::parse(url)) else {
            return false;
        };
        url.scheme() == base.scheme()
            && url.host_str() == base.host_str()
            && url.port_or_known_default() == base.port_or_known_default()
            && url.path().starts_with(base.path().trim_end_matches('/'))
    }

    fn check_status(url: &str, response: &reqwest::Response) -> Result<(), FetchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0");
        if status.as_u16() == 429 || (status.as_u16() == 403 && exhausted) {
            return Err(FetchError::RateLimited {
                url: url.to_string(),
            });
        }

        Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!("GET {}", url);
        let response = self
            .request(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        Self::check_status(url, &response)?;
        response.text().await.map_err(|e| FetchError::network(url, e))
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressBar,
    ) -> Result<u64, FetchError> {
        tracing::debug!("Downloading {} -> {}", url, dest.display());
        let mut response = tokio::time::timeout(STALL_TIMEOUT, self.request(url).send())
            .await
            .map_err(|_| FetchError::network(url, "timed out waiting for response"))?
            .map_err(|e| FetchError::network(url, e))?;

        Self::check_status(url, &response)?;

        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut downloaded: u64 = 0;

        loop {
            let chunk = tokio::time::timeout(STALL_TIMEOUT, response.chunk())
                .await
                .map_err(|_| FetchError::network(url, "download stalled"))?
                .map_err(|e| FetchError::network(url, e))?;
            let Some(chunk) = chunk else { break };

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress.set_position(downloaded);
        }

        file.flush().await?;
        file.sync_all().await?;
        progress.finish_and_clear();

        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_only_sent_to_api_host() {
        let fetcher =
            HttpFetcher::new("https://api.github.com", Some("secret".into())).unwrap();
        assert!(fetcher.is_api_url("https://api.github.com/repos/acme/tool/releases"));
        assert!(!fetcher.is_api_url("https://api.github.com.attacker.net/repos/acme/tool"));
        assert!(!fetcher.is_api_url("http://api.github.com/repos/acme/tool"));
        assert!(!fetcher.is_api_url("https://api.github.com:8443/repos"));
        assert!(!fetcher.is_api_url("https://raw.githubusercontent.com/acme/tool/HEAD/x"));
        assert!(!fetcher.is_api_url("not a url"));
    }

    #[test]
    fn test_not_found_detection() {
        let err = FetchError::Status {
            url: "https://x".into(),
            status: 404,
        };
        assert!(err.is_not_found());
        let err = FetchError::Status {
            url: "https://x".into(),
            status: 500,
        };
        assert!(!err.is_not_found());
        assert!(!FetchError::RateLimited { url: "u".into() }.is_not_found());
    }

    #[test]
    fn test_fetcher_builds() {
        let fetcher = HttpFetcher::new("https://api.github.com/", None).unwrap();
        assert!(fetcher.is_api_url("https://api.github.com/rate_limit"));
    }
}
