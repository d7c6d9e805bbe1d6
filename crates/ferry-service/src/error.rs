//! Error types for artifact service calls.

use ferry_artifact::ArtifactId;
use reqwest::StatusCode;
use thiserror::Error;

use crate::types::TokenScope;

/// Why a single HTTP call to the service failed.
#[derive(Debug, Error)]
pub enum CallError {
  /// The service answered with a non-success status.
  #[error("service responded with {status}: {body}")]
  Status { status: StatusCode, body: String },

  /// The request never produced a usable response (connect, timeout, body read).
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  /// The service answered, but the body did not match the expected shape.
  #[error("failed to decode response: {0}")]
  Decode(#[from] serde_json::Error),

  /// A service endpoint could not be built from the base URL.
  #[error("invalid endpoint url: {0}")]
  Url(#[from] url::ParseError),
}

impl CallError {
  pub fn status(&self) -> Option<StatusCode> {
    match self {
      CallError::Status { status, .. } => Some(*status),
      CallError::Transport(e) => e.status(),
      CallError::Url(_) | CallError::Decode(_) => None,
    }
  }
}

/// Errors surfaced by [`ArtifactService`](crate::ArtifactService) operations.
#[derive(Debug, Error)]
pub enum ServiceError {
  /// The service refused or failed to issue a token.
  #[error("failed to issue {scope} token: {source}")]
  TokenIssuance {
    scope: TokenScope,
    #[source]
    source: CallError,
  },

  /// The upload URL could not be exchanged for a presigned storage URL.
  #[error("failed to get presigned url: {source}")]
  PresignedUrl {
    #[source]
    source: CallError,
  },

  /// The service was not told that an upload finished. Callers treat this as a warning.
  #[error("failed to mark artifact {artifact_id} complete: {source}")]
  CompletionNotification {
    artifact_id: ArtifactId,
    #[source]
    source: CallError,
  },

  /// The artifact listing could not be fetched.
  #[error("failed to fetch artifacts: {source}")]
  MetadataFetch {
    #[source]
    source: CallError,
  },

  /// No artifact with this identifier exists in the listing.
  #[error("artifact not found: {0}")]
  ArtifactNotFound(ArtifactId),
}

impl ServiceError {
  /// The HTTP status behind this error, when the service produced one.
  ///
  /// `401`/`403` mean the token's constraints rejected the call; `None` means the
  /// request never got an answer.
  pub fn status(&self) -> Option<StatusCode> {
    match self {
      ServiceError::TokenIssuance { source, .. }
      | ServiceError::PresignedUrl { source }
      | ServiceError::CompletionNotification { source, .. }
      | ServiceError::MetadataFetch { source } => source.status(),
      ServiceError::ArtifactNotFound(_) => None,
    }
  }
}
