use std::fmt;

use ferry_artifact::ArtifactId;
use url::Url;

/// What a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
  Upload,
  Download { artifact_id: ArtifactId },
}

impl TokenScope {
  pub fn as_str(&self) -> &'static str {
    match self {
      TokenScope::Upload => "upload",
      TokenScope::Download { .. } => "download",
    }
  }
}

impl fmt::Display for TokenScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A freshly issued token and the URL to continue with.
///
/// For [`TokenScope::Upload`] the follow-up URL is the upload-initiation URL that
/// accepts file metadata. For [`TokenScope::Download`] it is a ready-to-use
/// presigned download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
  pub value: String,
  pub scope: TokenScope,
  pub follow_up_url: Url,
  /// Token kind as labelled by the service, if it reports one.
  pub kind: Option<String>,
}

/// Result of exchanging an upload URL for direct storage access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUpload {
  /// Write-once URL for this upload.
  pub presigned_url: Url,
  /// Identifier of the pending artifact the service created.
  pub artifact_id: ArtifactId,
}

/// The service's acknowledgement of a completion notification.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionAck {
  pub artifact_id: ArtifactId,
  pub body: serde_json::Value,
}
