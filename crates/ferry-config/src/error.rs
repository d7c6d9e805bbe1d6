use thiserror::Error;

/// Errors that can occur while building a [`ClientConfig`](crate::ClientConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The service base URL could not be parsed.
  #[error("invalid base url '{url}': {source}")]
  InvalidBaseUrl {
    url: String,
    #[source]
    source: url::ParseError,
  },

  /// The base URL cannot carry a path (e.g. `mailto:`).
  #[error("base url '{url}' cannot be used as a service root")]
  NotABase { url: String },

  /// The configuration document is not valid JSON for this schema.
  #[error("failed to parse config: {0}")]
  Parse(#[from] serde_json::Error),
}
