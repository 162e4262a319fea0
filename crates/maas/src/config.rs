//! Configuration for the MAAS client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Environment variable holding the MAAS root URL.
pub const ENV_URL: &str = "BDSYNC_MAAS_URL";
/// Environment variable holding the `Authorization` header value.
pub const ENV_AUTHORIZATION: &str = "BDSYNC_MAAS_AUTHORIZATION";
/// Environment variable holding the request timeout in seconds.
pub const ENV_TIMEOUT: &str = "BDSYNC_MAAS_TIMEOUT";

/// Configuration for the `MaasClient`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaasConfig {
    /// Root of the MAAS service (e.g. `http://maas.example:5240/MAAS/`).
    #[serde(default)]
    pub base_url: Option<Url>,

    /// `Authorization` header value, sent verbatim.
    #[serde(default)]
    pub authorization: Option<String>,

    /// Timeout for requests.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// API version segment of request paths.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl std::fmt::Debug for MaasConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaasConfig")
            .field("base_url", &self.base_url)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .field("timeout", &self.timeout)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl Default for MaasConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            authorization: None,
            timeout: default_timeout(),
            api_version: default_api_version(),
        }
    }
}

impl MaasConfig {
    /// Create a new config for the given service root.
    pub fn with_url(base_url: Url) -> Self {
        Self {
            base_url: Some(base_url),
            ..Default::default()
        }
    }

    /// Set the authorization header value.
    #[must_use]
    pub fn authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the API version.
    #[must_use]
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Overlay environment variables on top of this config.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_URL) {
            if let Ok(parsed) = url.parse() {
                self.base_url = Some(parsed);
            }
        }

        if let Some(authorization) = lookup(ENV_AUTHORIZATION) {
            self.authorization = Some(authorization);
        }

        if let Some(timeout) = lookup(ENV_TIMEOUT) {
            if let Ok(secs) = timeout.trim().parse() {
                self.timeout = Duration::from_secs(secs);
            }
        }

        self
    }

    /// Root of the versioned API, always ending in `/`.
    ///
    /// # Errors
    ///
    /// Fails when no base URL is configured.
    pub fn api_root(&self) -> Result<Url> {
        let base = self
            .base_url
            .as_ref()
            .ok_or_else(|| Error::config_error("No MAAS base URL configured"))?;

        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(base.join(&format!("api/{}/", self.api_version.trim_matches('/')))?)
    }
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_api_version() -> String {
    "2.0".to_string()
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
