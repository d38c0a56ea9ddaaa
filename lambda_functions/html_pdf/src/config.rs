use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

/// Longest lifetime S3 accepts for a SigV4 presigned URL (7 days).
const MAX_URL_TTL_SECS: u64 = 604_800;
const DEFAULT_URL_TTL_SECS: u64 = 3600;

/// Flags headless Chromium needs inside the Lambda sandbox.
const DEFAULT_CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--no-zygote",
    "--single-process",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--hide-scrollbars",
    "--mute-audio",
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    Missing(&'static str),
    #[error("Environment variable {name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// How the renderer launches Chrome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromeConfig {
    /// `None` lets headless_chrome look for an installed Chrome/Chromium.
    pub path: Option<PathBuf>,
    pub args: Vec<String>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            path: None,
            args: DEFAULT_CHROME_ARGS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub html_bucket: String,
    pub pdf_bucket: String,
    pub url_ttl: Duration,
    pub chrome: ChromeConfig,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let html_bucket = var("HTML_BUCKET").ok_or(ConfigError::Missing("HTML_BUCKET"))?;
        let pdf_bucket = var("PDF_BUCKET").unwrap_or_else(|| html_bucket.clone());

        let url_ttl = match var("PDF_URL_TTL_SECS") {
            Some(raw) => parse_ttl(&raw)?,
            None => Duration::from_secs(DEFAULT_URL_TTL_SECS),
        };

        let mut chrome = ChromeConfig::default();
        if let Some(path) = var("CHROME_PATH") {
            chrome.path = Some(PathBuf::from(path));
        }
        if let Some(args) = var("CHROME_ARGS") {
            chrome.args = args.split_whitespace().map(str::to_string).collect();
        }

        Ok(Self {
            html_bucket,
            pdf_bucket,
            url_ttl,
            chrome,
        })
    }

    /// Logs the resolved settings once at cold start.
    pub fn log_summary(&self) {
        info!(
            html_bucket = %self.html_bucket,
            pdf_bucket = %self.pdf_bucket,
            url_ttl_secs = self.url_ttl.as_secs(),
            chrome_path = ?self.chrome.path,
            chrome_args = ?self.chrome.args,
            "configuration loaded"
        );
    }
}

fn parse_ttl(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason| ConfigError::Invalid {
        name: "PDF_URL_TTL_SECS",
        value: raw.to_string(),
        reason,
    };
    let secs: u64 = raw.parse().map_err(|_| invalid("not a whole number of seconds"))?;
    if secs == 0 || secs > MAX_URL_TTL_SECS {
        return Err(invalid("must be between 1 and 604800"));
    }
    Ok(Duration::from_secs(secs))
}
