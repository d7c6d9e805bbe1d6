use async_trait::async_trait;
use ferry_artifact::{Artifact, ArtifactId, FileDescriptor};
use ferry_config::TokenConstraints;
use url::Url;

use crate::error::ServiceError;
use crate::types::{CompletionAck, IssuedToken, PresignedUpload, TokenScope};

/// Control-plane operations of the artifact service.
#[async_trait]
pub trait ArtifactService: Send + Sync {
  /// Request a new token. Each call issues a distinct token.
  async fn request_token(
    &self,
    scope: TokenScope,
    constraints: &TokenConstraints,
  ) -> Result<IssuedToken, ServiceError>;

  /// Trade an upload-initiation URL and file metadata for a presigned storage URL.
  ///
  /// The URL may come from [`request_token`](Self::request_token) or from a
  /// privileged actor who minted the token out of band.
  async fn exchange_for_upload(
    &self,
    upload_url: &Url,
    file: &FileDescriptor,
  ) -> Result<PresignedUpload, ServiceError>;

  /// Tell the service an upload finished.
  async fn notify_complete(&self, artifact_id: ArtifactId) -> Result<CompletionAck, ServiceError>;

  /// Fetch every artifact record.
  async fn list_artifacts(&self) -> Result<Vec<Artifact>, ServiceError>;

  /// Look up a single artifact.
  ///
  /// The service offers no per-artifact endpoint, so this fetches the whole
  /// listing and scans it. Cost grows with the size of the collection.
  async fn get_artifact(&self, artifact_id: ArtifactId) -> Result<Artifact, ServiceError> {
    self
      .list_artifacts()
      .await?
      .into_iter()
      .find(|a| a.uuid == artifact_id)
      .ok_or(ServiceError::ArtifactNotFound(artifact_id))
  }
}
