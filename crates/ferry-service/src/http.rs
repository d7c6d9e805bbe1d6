//! reqwest-backed [`ArtifactService`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_artifact::{Artifact, ArtifactId, FileDescriptor};
use ferry_config::{ClientConfig, TokenConstraints};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{CallError, ServiceError};
use crate::service::ArtifactService;
use crate::types::{CompletionAck, IssuedToken, PresignedUpload, TokenScope};

const UPLOAD_TOKEN_PATH: &str = "genUploadPresignedURL";
const DOWNLOAD_TOKEN_PATH: &str = "genDownloadPresignedURL";
const ARTIFACTS_PATH: &str = "artifact-service/v1/artifacts/";

/// Build the HTTP client shared by the service client and the transfer executor.
pub fn build_client(config: &ClientConfig) -> Result<Client, reqwest::Error> {
  let user_agent = config
    .user_agent
    .clone()
    .unwrap_or_else(|| format!("ferry/{}", env!("CARGO_PKG_VERSION")));

  let mut builder = Client::builder()
    .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
    .user_agent(user_agent);

  if let Some(timeout) = config.connect_timeout() {
    builder = builder.connect_timeout(timeout);
  }

  builder.build()
}

#[derive(Debug, Serialize)]
struct UploadTokenRequest<'a> {
  max_uploads: u32,
  valid_from: Option<DateTime<Utc>>,
  valid_to: Option<DateTime<Utc>>,
  allowed_cidr: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DownloadTokenRequest<'a> {
  artifact_uuid: ArtifactId,
  max_downloads: u32,
  valid_from: Option<DateTime<Utc>>,
  valid_to: Option<DateTime<Utc>>,
  allowed_cidr: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct UploadTokenResponse {
  token: String,
  upload_url: Url,
  #[serde(default, rename = "type")]
  kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadTokenResponse {
  token: String,
  presigned_url: Url,
  #[serde(default, rename = "type")]
  kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PresignedUploadResponse {
  presigned_url: Url,
  uuid: ArtifactId,
}

/// Artifact service client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpArtifactService {
  client: Client,
  config: ClientConfig,
}

impl HttpArtifactService {
  /// Create a client with its own connection pool.
  pub fn new(config: ClientConfig) -> Result<Self, reqwest::Error> {
    let client = build_client(&config)?;
    Ok(Self::with_client(client, config))
  }

  /// Create a client sharing an existing connection pool.
  pub fn with_client(client: Client, config: ClientConfig) -> Self {
    Self { client, config }
  }

  pub fn config(&self) -> &ClientConfig {
    &self.config
  }

  fn with_timeout(&self, request: RequestBuilder) -> RequestBuilder {
    match self.config.request_timeout() {
      Some(timeout) => request.timeout(timeout),
      None => request,
    }
  }

  async fn upload_token(&self, constraints: &TokenConstraints) -> Result<IssuedToken, CallError> {
    let body = UploadTokenRequest {
      max_uploads: constraints.max_uses,
      valid_from: constraints.valid_from,
      valid_to: constraints.valid_to,
      allowed_cidr: constraints.allowed_cidr.as_deref(),
    };
    let url = self.config.endpoint(UPLOAD_TOKEN_PATH)?;
    let response: UploadTokenResponse =
      send_json(self.with_timeout(self.client.post(url).json(&body))).await?;

    Ok(IssuedToken {
      value: response.token,
      scope: TokenScope::Upload,
      follow_up_url: response.upload_url,
      kind: response.kind,
    })
  }

  async fn download_token(
    &self,
    artifact_id: ArtifactId,
    constraints: &TokenConstraints,
  ) -> Result<IssuedToken, CallError> {
    let body = DownloadTokenRequest {
      artifact_uuid: artifact_id,
      max_downloads: constraints.max_uses,
      valid_from: constraints.valid_from,
      valid_to: constraints.valid_to,
      allowed_cidr: constraints.allowed_cidr.as_deref(),
    };
    let url = self.config.endpoint(DOWNLOAD_TOKEN_PATH)?;
    let response: DownloadTokenResponse =
      send_json(self.with_timeout(self.client.post(url).json(&body))).await?;

    Ok(IssuedToken {
      value: response.token,
      scope: TokenScope::Download { artifact_id },
      follow_up_url: response.presigned_url,
      kind: response.kind,
    })
  }

  async fn complete(&self, artifact_id: ArtifactId) -> Result<serde_json::Value, CallError> {
    let url = self
      .config
      .endpoint(&format!("{ARTIFACTS_PATH}{artifact_id}/complete"))?;
    let response = send(self.with_timeout(self.client.post(url))).await?;
    let body = response.text().await?;

    if body.trim().is_empty() {
      return Ok(serde_json::Value::Null);
    }
    // Try to parse body as JSON, fall back to string
    Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)))
  }

  async fn fetch_listing(&self) -> Result<Vec<serde_json::Value>, ServiceError> {
    let fetch = async {
      let url = self.config.endpoint(ARTIFACTS_PATH)?;
      // `null` is treated as an empty listing.
      let records: Option<Vec<serde_json::Value>> =
        send_json(self.with_timeout(self.client.get(url))).await?;
      Ok::<_, CallError>(records.unwrap_or_default())
    };

    fetch.await.map_err(|source| {
      warn!(error = %source, "artifact_listing_failed");
      ServiceError::MetadataFetch { source }
    })
  }
}

#[async_trait]
impl ArtifactService for HttpArtifactService {
  #[instrument(name = "request_token", skip(self, constraints), fields(scope = %scope))]
  async fn request_token(
    &self,
    scope: TokenScope,
    constraints: &TokenConstraints,
  ) -> Result<IssuedToken, ServiceError> {
    let result = match scope {
      TokenScope::Upload => self.upload_token(constraints).await,
      TokenScope::Download { artifact_id } => self.download_token(artifact_id, constraints).await,
    };

    match result {
      Ok(token) => {
        info!(max_uses = constraints.max_uses, "token_issued");
        Ok(token)
      }
      Err(source) => {
        warn!(error = %source, "token_issuance_failed");
        Err(ServiceError::TokenIssuance { scope, source })
      }
    }
  }

  #[instrument(name = "exchange_for_upload", skip(self, upload_url, file), fields(filename = %file.filename))]
  async fn exchange_for_upload(
    &self,
    upload_url: &Url,
    file: &FileDescriptor,
  ) -> Result<PresignedUpload, ServiceError> {
    let request = self.with_timeout(self.client.post(upload_url.clone()).json(file));
    let response: PresignedUploadResponse = send_json(request).await.map_err(|source| {
      warn!(error = %source, "upload_url_exchange_failed");
      ServiceError::PresignedUrl { source }
    })?;

    info!(artifact_id = %response.uuid, "upload_url_issued");
    Ok(PresignedUpload {
      presigned_url: response.presigned_url,
      artifact_id: response.uuid,
    })
  }

  #[instrument(name = "notify_complete", skip(self))]
  async fn notify_complete(&self, artifact_id: ArtifactId) -> Result<CompletionAck, ServiceError> {
    let body = self
      .complete(artifact_id)
      .await
      .map_err(|source| ServiceError::CompletionNotification {
        artifact_id,
        source,
      })?;

    debug!(ack = %body, "completion_acknowledged");
    Ok(CompletionAck { artifact_id, body })
  }

  #[instrument(name = "list_artifacts", skip(self))]
  async fn list_artifacts(&self) -> Result<Vec<Artifact>, ServiceError> {
    let records = self.fetch_listing().await?;
    let total = records.len();

    let artifacts: Vec<Artifact> = records
      .into_iter()
      .filter_map(|record| match serde_json::from_value(record) {
        Ok(artifact) => Some(artifact),
        Err(e) => {
          warn!(error = %e, "artifact_record_skipped");
          None
        }
      })
      .collect();

    debug!(count = artifacts.len(), skipped = total - artifacts.len(), "artifacts_listed");
    Ok(artifacts)
  }

  /// Scans the raw listing by `uuid` and decodes only the matching record, so
  /// one malformed record does not hide the others.
  #[instrument(name = "get_artifact", skip(self))]
  async fn get_artifact(&self, artifact_id: ArtifactId) -> Result<Artifact, ServiceError> {
    let record = self
      .fetch_listing()
      .await?
      .into_iter()
      .find(|record| record_id(record) == Some(artifact_id))
      .ok_or(ServiceError::ArtifactNotFound(artifact_id))?;

    serde_json::from_value(record).map_err(|e| {
      warn!(error = %e, "artifact_record_invalid");
      ServiceError::MetadataFetch { source: e.into() }
    })
  }
}

/// The record's `uuid`, if it is a well-formed artifact id.
fn record_id(record: &serde_json::Value) -> Option<ArtifactId> {
  record
    .get("uuid")
    .and_then(|v| v.as_str())
    .and_then(|s| ArtifactId::parse_str(s).ok())
}

/// Send a request, turning non-success statuses into [`CallError::Status`].
async fn send(request: RequestBuilder) -> Result<Response, CallError> {
  let response = request.send().await?;
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  Err(CallError::Status { status, body })
}

/// Send a request and decode its JSON body. Body read failures are transport
/// errors; bodies of the wrong shape are [`CallError::Decode`].
async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, CallError> {
  let body = send(request).await?.bytes().await?;
  Ok(serde_json::from_slice(&body)?)
}
