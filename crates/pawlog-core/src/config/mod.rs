//! Client configuration for the sync layer.
//!
//! `SyncSettings` is shared by the CLI profiles and anything else that embeds
//! the engine. Every field is optional; unset values fall back to defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

/// Where the pet-care API listens when nothing else is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";
/// Upper bound for a single create/update/delete round trip.
pub const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 5;
/// Environment override for the API base URL.
pub const API_URL_ENV: &str = "PAWLOG_API_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub push_timeout_secs: Option<u64>,
    /// Run a background pass this often while idle; unset or zero disables it.
    #[serde(default)]
    pub sync_interval_secs: Option<u64>,
}

impl SyncSettings {
    /// Normalized API base URL, or the default when unset.
    pub fn api_base_url(&self) -> Result<String, String> {
        normalize_text_option(self.api_base_url.clone()).map_or_else(
            || Ok(DEFAULT_API_BASE_URL.to_string()),
            |url| normalize_api_base_url(&url),
        )
    }

    #[must_use]
    pub fn push_timeout(&self) -> Duration {
        let secs = self
            .push_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_PUSH_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn sync_interval(&self) -> Option<Duration> {
        self.sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Replace the API URL when an override is present and non-blank.
    #[must_use]
    pub fn with_api_url_override(mut self, api_url: Option<String>) -> Self {
        if let Some(url) = normalize_text_option(api_url) {
            self.api_base_url = Some(url);
        }
        self
    }

    /// Check that every configured value is usable.
    pub fn validate(&self) -> Result<(), String> {
        self.api_base_url()?;
        if self.push_timeout_secs == Some(0) {
            return Err("push_timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Trim, require an http(s) scheme, and drop trailing `/` or `/api`.
///
/// Route paths (`/api/animals`, `/health`) are appended by the client, so
/// both `http://host:5000` and `http://host:5000/api/` are accepted.
pub fn normalize_api_base_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err("API base URL must not be empty".to_string());
    }
    if !is_http_url(trimmed) {
        return Err(format!(
            "API base URL '{trimmed}' must include http:// or https://"
        ));
    }
    let base = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    Ok(base.trim_end_matches('/').to_string())
}
