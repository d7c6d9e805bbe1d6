//! Public transfer flows.

use std::sync::Arc;

use bytes::Bytes;
use ferry_artifact::{Artifact, ArtifactId, UploadFile};
use ferry_config::{ClientConfig, TokenConstraints};
use ferry_service::{
  ArtifactService, CompletionAck, HttpArtifactService, IssuedToken, ServiceError, TokenScope,
  build_client,
};
use ferry_transfer::{TransferControl, TransferExecutor, TransferRequest};
use serde::Serialize;
use tokio::io::AsyncWrite;
use tracing::{info, instrument, warn};
use url::Url;

use crate::error::FlowError;
use crate::events::{NoopNotifier, TransferNotifier};
use crate::options::{DownloadOptions, UploadOptions};
use crate::state::{FlowKind, TransferMachine, TransferState};

/// Suggested filename for delegated downloads, where the artifact is unknown.
pub const DELEGATED_DOWNLOAD_FILENAME: &str = "downloaded-file";

/// Outcome of the best-effort completion notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CompletionOutcome {
  /// The service acknowledged the upload with this body.
  Acknowledged(serde_json::Value),
  /// The notification failed; the service will reconcile the artifact on its own.
  Warning(String),
}

impl CompletionOutcome {
  pub fn is_acknowledged(&self) -> bool {
    matches!(self, CompletionOutcome::Acknowledged(_))
  }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
  #[serde(rename = "uuid")]
  pub artifact_id: ArtifactId,
  pub filename: String,
  pub size: Option<u64>,
  pub content_type: String,
  /// The token the flow requested. `None` for delegated uploads.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub token: Option<String>,
  pub completion: CompletionOutcome,
}

/// What a streamed download wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
  /// Bytes written to the sink.
  pub size: u64,
  pub content_type: Option<String>,
  /// The artifact id for self-service downloads, [`DELEGATED_DOWNLOAD_FILENAME`] otherwise.
  pub suggested_filename: String,
}

/// Bytes fetched by an in-memory download, ready to be persisted by the caller.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
  pub bytes: Bytes,
  pub content_type: Option<String>,
  pub suggested_filename: String,
}

impl DownloadedFile {
  fn new(bytes: Vec<u8>, summary: DownloadSummary) -> Self {
    Self {
      bytes: Bytes::from(bytes),
      content_type: summary.content_type,
      suggested_filename: summary.suggested_filename,
    }
  }
}

/// Runs upload and download flows against the artifact service and storage.
///
/// Each call owns its machine, token and URLs. Calls may run concurrently.
pub struct TransferOrchestrator {
  service: Arc<dyn ArtifactService>,
  executor: TransferExecutor,
  notifier: Arc<dyn TransferNotifier>,
}

impl TransferOrchestrator {
  /// Create an orchestrator talking HTTP to the configured service. The service
  /// client and the storage executor share one connection pool.
  pub fn new(config: ClientConfig) -> Result<Self, reqwest::Error> {
    let client = build_client(&config)?;
    let service = HttpArtifactService::with_client(client.clone(), config);
    Ok(Self::with_parts(Arc::new(service), TransferExecutor::new(client)))
  }

  pub fn with_parts(service: Arc<dyn ArtifactService>, executor: TransferExecutor) -> Self {
    Self {
      service,
      executor,
      notifier: Arc::new(NoopNotifier),
    }
  }

  /// Publish state transitions to `notifier`.
  pub fn with_notifier(mut self, notifier: impl TransferNotifier + 'static) -> Self {
    self.notifier = Arc::new(notifier);
    self
  }

  /// Upload a file, requesting an upload token first.
  #[instrument(name = "upload", skip_all, fields(filename = %file.descriptor().filename))]
  pub async fn upload(
    &self,
    file: UploadFile,
    options: UploadOptions,
  ) -> Result<UploadReceipt, FlowError> {
    let mut machine = TransferMachine::self_service(FlowKind::Upload, self.notifier.clone());

    machine.enter(TransferState::TokenRequested);
    let token = self
      .service
      .request_token(TokenScope::Upload, &options.constraints)
      .await
      .map_err(|e| machine.fail(e))?;
    machine.enter(TransferState::TokenIssued);

    self
      .run_upload(
        machine,
        &token.follow_up_url,
        file,
        options.control,
        Some(token.value),
      )
      .await
  }

  /// Upload a file through an upload-initiation URL minted out of band.
  #[instrument(name = "upload_with_token_url", skip_all, fields(filename = %file.descriptor().filename))]
  pub async fn upload_with_token_url(
    &self,
    upload_url: &Url,
    file: UploadFile,
    control: TransferControl,
  ) -> Result<UploadReceipt, FlowError> {
    let machine = TransferMachine::delegated(FlowKind::Upload, self.notifier.clone());
    self.run_upload(machine, upload_url, file, control, None).await
  }

  async fn run_upload(
    &self,
    mut machine: TransferMachine,
    upload_url: &Url,
    file: UploadFile,
    control: TransferControl,
    token: Option<String>,
  ) -> Result<UploadReceipt, FlowError> {
    let (descriptor, body) = file.into_parts();

    machine.enter(TransferState::UrlExchangeRequested);
    let presigned = self
      .service
      .exchange_for_upload(upload_url, &descriptor)
      .await
      .map_err(|e| machine.fail(e))?;
    machine.enter(TransferState::UrlIssued);

    machine.enter(TransferState::Transferring);
    let request = TransferRequest {
      body,
      content_type: descriptor.content_type.clone(),
      size: descriptor.size,
      control,
    };
    self
      .executor
      .upload(&presigned.presigned_url, request)
      .await
      .map_err(|e| machine.fail(e))?;
    machine.enter(TransferState::Transferred);

    machine.enter(TransferState::NotifyingCompletion);
    let completion = self.notify_best_effort(&machine, presigned.artifact_id).await;
    machine.enter(TransferState::Done);

    info!(
      transfer_id = %machine.transfer_id(),
      artifact_id = %presigned.artifact_id,
      size = ?descriptor.size,
      "upload_completed"
    );

    Ok(UploadReceipt {
      artifact_id: presigned.artifact_id,
      filename: descriptor.filename,
      size: descriptor.size,
      content_type: descriptor.content_type,
      token,
      completion,
    })
  }

  async fn notify_best_effort(
    &self,
    machine: &TransferMachine,
    artifact_id: ArtifactId,
  ) -> CompletionOutcome {
    match self.service.notify_complete(artifact_id).await {
      Ok(ack) => CompletionOutcome::Acknowledged(ack.body),
      Err(e) => {
        warn!(
          transfer_id = %machine.transfer_id(),
          artifact_id = %artifact_id,
          error = %e,
          "completion_notification_failed"
        );
        machine.completion_warning(artifact_id, &e);
        CompletionOutcome::Warning(e.to_string())
      }
    }
  }

  /// Download an artifact into memory, requesting a download token first.
  ///
  /// Use [`download_to`](Self::download_to) for artifacts that should not be
  /// held in memory.
  pub async fn download(
    &self,
    artifact_id: ArtifactId,
    options: DownloadOptions,
  ) -> Result<DownloadedFile, FlowError> {
    let mut buf = Vec::new();
    let summary = self.download_to(artifact_id, options, &mut buf).await?;
    Ok(DownloadedFile::new(buf, summary))
  }

  /// Download an artifact, streaming its bytes into `sink`.
  #[instrument(name = "download", skip(self, options, sink))]
  pub async fn download_to<W>(
    &self,
    artifact_id: ArtifactId,
    options: DownloadOptions,
    sink: &mut W,
  ) -> Result<DownloadSummary, FlowError>
  where
    W: AsyncWrite + Unpin + Send + ?Sized,
  {
    let mut machine = TransferMachine::self_service(FlowKind::Download, self.notifier.clone());

    machine.enter(TransferState::TokenRequested);
    let token = self
      .service
      .request_token(TokenScope::Download { artifact_id }, &options.constraints)
      .await
      .map_err(|e| machine.fail(e))?;
    machine.enter(TransferState::TokenIssued);

    self
      .run_download(
        machine,
        &token.follow_up_url,
        &options.control,
        sink,
        artifact_id.to_string(),
      )
      .await
  }

  /// Download into memory through a presigned URL minted out of band. The
  /// token service is never called.
  pub async fn download_with_token_url(
    &self,
    presigned_url: &Url,
    control: TransferControl,
  ) -> Result<DownloadedFile, FlowError> {
    let mut buf = Vec::new();
    let summary = self
      .download_with_token_url_to(presigned_url, control, &mut buf)
      .await?;
    Ok(DownloadedFile::new(buf, summary))
  }

  /// Stream a download through a presigned URL minted out of band into `sink`.
  #[instrument(name = "download_with_token_url", skip_all)]
  pub async fn download_with_token_url_to<W>(
    &self,
    presigned_url: &Url,
    control: TransferControl,
    sink: &mut W,
  ) -> Result<DownloadSummary, FlowError>
  where
    W: AsyncWrite + Unpin + Send + ?Sized,
  {
    let machine = TransferMachine::delegated(FlowKind::Download, self.notifier.clone());
    self
      .run_download(
        machine,
        presigned_url,
        &control,
        sink,
        DELEGATED_DOWNLOAD_FILENAME.to_string(),
      )
      .await
  }

  async fn run_download<W>(
    &self,
    mut machine: TransferMachine,
    presigned_url: &Url,
    control: &TransferControl,
    sink: &mut W,
    suggested_filename: String,
  ) -> Result<DownloadSummary, FlowError>
  where
    W: AsyncWrite + Unpin + Send + ?Sized,
  {
    // Download tokens already carry the presigned URL; the exchange is a no-op.
    machine.enter(TransferState::UrlExchangeRequested);
    machine.enter(TransferState::UrlIssued);

    machine.enter(TransferState::Transferring);
    let stream = self
      .executor
      .download(presigned_url, &control.cancel_token())
      .await
      .map_err(|e| machine.fail(e))?;
    let content_type = stream.content_type.clone();
    let size = stream
      .write_to(sink, control)
      .await
      .map_err(|e| machine.fail(e))?;
    machine.enter(TransferState::Transferred);
    machine.enter(TransferState::Done);

    info!(
      transfer_id = %machine.transfer_id(),
      size,
      "download_completed"
    );

    Ok(DownloadSummary {
      size,
      content_type,
      suggested_filename,
    })
  }

  /// Mint an upload token without transferring anything. The returned
  /// follow-up URL can be handed to another party for
  /// [`upload_with_token_url`](Self::upload_with_token_url).
  pub async fn create_upload_token(
    &self,
    constraints: &TokenConstraints,
  ) -> Result<IssuedToken, ServiceError> {
    self.service.request_token(TokenScope::Upload, constraints).await
  }

  /// Mint a download token without transferring anything. The returned
  /// follow-up URL is a ready-to-use presigned download URL.
  pub async fn create_download_token(
    &self,
    artifact_id: ArtifactId,
    constraints: &TokenConstraints,
  ) -> Result<IssuedToken, ServiceError> {
    self
      .service
      .request_token(TokenScope::Download { artifact_id }, constraints)
      .await
  }

  pub async fn get_artifact(&self, artifact_id: ArtifactId) -> Result<Artifact, ServiceError> {
    self.service.get_artifact(artifact_id).await
  }

  pub async fn list_artifacts(&self) -> Result<Vec<Artifact>, ServiceError> {
    self.service.list_artifacts().await
  }

  /// Mark an artifact complete. Unlike the notification inside an upload flow,
  /// failures are returned.
  pub async fn complete_upload(&self, artifact_id: ArtifactId) -> Result<CompletionAck, ServiceError> {
    self.service.notify_complete(artifact_id).await
  }
}
