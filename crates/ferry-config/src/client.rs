use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

fn default_max_redirects() -> usize {
  10
}

/// Connection settings for the artifact service.
///
/// ```json
/// {
///   "base_url": "http://localhost:8080",
///   "request_timeout_secs": 30,
///   "max_redirects": 10
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
  /// Root of the artifact service. Service endpoints are joined beneath it.
  #[serde(deserialize_with = "deserialize_base_url")]
  pub base_url: Url,

  /// Timeout applied to each control-plane call (token, exchange, notify, metadata).
  /// Byte transfers against storage are never timed out.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub request_timeout_secs: Option<u64>,

  /// Timeout for establishing a TCP connection.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub connect_timeout_secs: Option<u64>,

  /// Redirects followed before a request fails. Presigned download URLs
  /// usually answer with a single redirect to the object store.
  #[serde(default = "default_max_redirects")]
  pub max_redirects: usize,

  /// Overrides the `User-Agent` header.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_agent: Option<String>,
}

impl ClientConfig {
  /// Create a config for the given service root with default settings.
  pub fn new(base_url: &str) -> Result<Self, ConfigError> {
    let base_url = Url::parse(base_url).map_err(|source| ConfigError::InvalidBaseUrl {
      url: base_url.to_string(),
      source,
    })?;

    Ok(Self {
      base_url: normalize_base(base_url)?,
      request_timeout_secs: None,
      connect_timeout_secs: None,
      max_redirects: default_max_redirects(),
      user_agent: None,
    })
  }

  /// Parse a config from a JSON document.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Resolve a service path (e.g. `"genUploadPresignedURL"`) against the base URL.
  pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
    self.base_url.join(path.trim_start_matches('/'))
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    self.request_timeout_secs.map(Duration::from_secs)
  }

  pub fn connect_timeout(&self) -> Option<Duration> {
    self.connect_timeout_secs.map(Duration::from_secs)
  }
}

/// Ensure the base path ends with `/` so relative joins stay beneath it.
fn normalize_base(mut url: Url) -> Result<Url, ConfigError> {
  if url.cannot_be_a_base() {
    return Err(ConfigError::NotABase {
      url: url.to_string(),
    });
  }

  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  url.set_query(None);
  url.set_fragment(None);
  Ok(url)
}

fn deserialize_base_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let url = Url::deserialize(deserializer)?;
  normalize_base(url).map_err(serde::de::Error::custom)
}
