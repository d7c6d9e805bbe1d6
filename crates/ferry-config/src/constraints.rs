//! Token constraint options.
//!
//! Every token request carries the same four constraints. Unset values are
//! sent as `null` and interpreted by the service.
//!
//! | Option         | Default | Meaning                                        |
//! |----------------|---------|------------------------------------------------|
//! | `max_uses`     | `1`     | Uploads or downloads the token may authorize   |
//! | `valid_from`   | none    | Start of the activation window (RFC 3339)      |
//! | `valid_to`     | none    | End of the activation window (RFC 3339)        |
//! | `allowed_cidr` | none    | Network range requests must originate from     |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_max_uses() -> u32 {
  1
}

/// Constraints attached to an upload or download token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConstraints {
  #[serde(default = "default_max_uses")]
  pub max_uses: u32,
  #[serde(default)]
  pub valid_from: Option<DateTime<Utc>>,
  #[serde(default)]
  pub valid_to: Option<DateTime<Utc>>,
  #[serde(default)]
  pub allowed_cidr: Option<String>,
}

impl Default for TokenConstraints {
  fn default() -> Self {
    Self {
      max_uses: default_max_uses(),
      valid_from: None,
      valid_to: None,
      allowed_cidr: None,
    }
  }
}

impl TokenConstraints {
  pub fn max_uses(mut self, max_uses: u32) -> Self {
    self.max_uses = max_uses;
    self
  }

  pub fn valid_from(mut self, at: DateTime<Utc>) -> Self {
    self.valid_from = Some(at);
    self
  }

  pub fn valid_to(mut self, at: DateTime<Utc>) -> Self {
    self.valid_to = Some(at);
    self
  }

  pub fn allowed_cidr(mut self, cidr: impl Into<String>) -> Self {
    self.allowed_cidr = Some(cidr.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_defaults() {
    let constraints = TokenConstraints::default();
    assert_eq!(constraints.max_uses, 1);
    assert!(constraints.valid_from.is_none());
    assert!(constraints.valid_to.is_none());
    assert!(constraints.allowed_cidr.is_none());
  }

  #[test]
  fn test_deserialize_partial() {
    let constraints: TokenConstraints =
      serde_json::from_str(r#"{"valid_to": "2026-01-01T00:00:00Z"}"#).unwrap();
    assert_eq!(constraints.max_uses, 1);
    assert_eq!(
      constraints.valid_to,
      Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    );
  }

  #[test]
  fn test_builder() {
    let constraints = TokenConstraints::default()
      .max_uses(5)
      .allowed_cidr("192.168.1.0/24");
    assert_eq!(constraints.max_uses, 5);
    assert_eq!(constraints.allowed_cidr.as_deref(), Some("192.168.1.0/24"));
  }
}
