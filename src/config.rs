use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5172/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid base URL `{url}`: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("base URL `{0}` must use http or https")]
    UnsupportedScheme(String),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// Everything a [`Runner`](crate::runner::Runner) needs to know about its
/// target. Passed in explicitly; there is no process-wide configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    base_url: Url,
    timeout: Duration,
    fail_fast: bool,
}

impl RunConfig {
    /// The base URL is normalised to end with `/` so endpoints join below it.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let mut normalised = base_url.trim().to_string();
        if !normalised.ends_with('/') {
            normalised.push('/');
        }

        let url = Url::parse(&normalised).map_err(|source| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            source,
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(base_url.to_string()));
        }

        Ok(Self {
            base_url: url,
            timeout: DEFAULT_TIMEOUT,
            fail_fast: false,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        self.timeout = timeout;
        Ok(self)
    }

    /// Abort the scenario at the first broken chain instead of skipping the
    /// dependents and carrying on.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Joins `endpoint` below the base URL. Leading slashes are stripped so an
    /// endpoint can never replace the base path.
    pub fn resolve(&self, endpoint: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(endpoint.trim_start_matches('/'))
    }
}
