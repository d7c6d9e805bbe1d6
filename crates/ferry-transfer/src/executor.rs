//! Transfer executor implementation.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use ferry_artifact::ByteStream;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::TransferError;
use crate::progress::{ProgressStream, ProgressTracker, TransferControl};

/// Everything needed to drive one upload.
pub struct TransferRequest {
  /// Payload, consumed by the upload.
  pub body: ByteStream,
  /// Sent as the `Content-Type` header. Presigned URLs may be signed over it.
  pub content_type: String,
  /// Declared total size. Enables `Content-Length` and progress reporting.
  pub size: Option<u64>,
  pub control: TransferControl,
}

impl fmt::Debug for TransferRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TransferRequest")
      .field("content_type", &self.content_type)
      .field("size", &self.size)
      .field("control", &self.control)
      .finish_non_exhaustive()
  }
}

/// Moves bytes directly to and from the object store.
#[derive(Debug, Clone)]
pub struct TransferExecutor {
  client: Client,
}

impl TransferExecutor {
  /// Create an executor. The client's redirect policy governs downloads.
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  /// Stream a payload to a presigned upload URL.
  ///
  /// Returns [`TransferError::Cancelled`] if the token is cancelled before or
  /// during the transfer; the in-flight request is dropped.
  #[instrument(
    name = "storage_upload",
    skip(self, url, request),
    fields(
      host = url.host_str().unwrap_or_default(),
      content_type = %request.content_type,
      size = ?request.size
    )
  )]
  pub async fn upload(&self, url: &Url, request: TransferRequest) -> Result<(), TransferError> {
    let TransferRequest {
      body,
      content_type,
      size,
      control,
    } = request;

    let cancel = control.cancel_token();
    if cancel.is_cancelled() {
      warn!("upload cancelled before start");
      return Err(TransferError::Cancelled);
    }

    let tracker = ProgressTracker::new(control.progress.clone(), size);
    let body = Body::wrap_stream(ProgressStream::new(body, tracker, cancel.clone()));

    let mut builder = self
      .client
      .put(url.clone())
      .header(CONTENT_TYPE, content_type)
      .body(body);
    if let Some(size) = size {
      builder = builder.header(CONTENT_LENGTH, size);
    }

    info!("upload_started");
    let sent = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        warn!("upload cancelled during transfer");
        return Err(TransferError::Cancelled);
      }
      result = builder.send() => result,
    };

    let response = match sent {
      Ok(response) => response,
      // The body stream aborts the request once cancelled.
      Err(_) if cancel.is_cancelled() => {
        warn!("upload cancelled during transfer");
        return Err(TransferError::Cancelled);
      }
      Err(e) => {
        error!(error = %e, "upload_failed");
        return Err(e.into());
      }
    };

    check_status(response).await.inspect_err(|e| {
      error!(error = %e, "upload_rejected");
    })?;

    info!("upload_completed");
    Ok(())
  }

  /// Open a download from a presigned URL, following redirects.
  ///
  /// The returned stream has not been read yet; see [`DownloadStream::write_to`].
  #[instrument(
    name = "storage_download",
    skip(self, url, cancel),
    fields(host = url.host_str().unwrap_or_default())
  )]
  pub async fn download(
    &self,
    url: &Url,
    cancel: &CancellationToken,
  ) -> Result<DownloadStream, TransferError> {
    if cancel.is_cancelled() {
      warn!("download cancelled before start");
      return Err(TransferError::Cancelled);
    }

    let sent = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        warn!("download cancelled while waiting for storage");
        return Err(TransferError::Cancelled);
      }
      result = self.client.get(url.clone()).send() => result,
    };

    let response = check_status(sent?).await.inspect_err(|e| {
      error!(error = %e, "download_rejected");
    })?;

    // Presigned URLs are credentials; log only where the bytes came from.
    debug!(
      final_host = response.url().host_str().unwrap_or_default(),
      content_length = ?response.content_length(),
      "download_started"
    );

    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string);

    Ok(DownloadStream {
      content_length: response.content_length(),
      content_type,
      stream: Box::pin(response.bytes_stream().map_err(TransferError::from)),
    })
  }
}

/// The body of a successful download response.
pub struct DownloadStream {
  /// Size announced by storage, if any.
  pub content_length: Option<u64>,
  pub content_type: Option<String>,
  stream: Pin<Box<dyn Stream<Item = Result<Bytes, TransferError>> + Send>>,
}

impl DownloadStream {
  /// Stream the body into `sink` chunk by chunk and flush it. Returns the
  /// number of bytes written.
  ///
  /// Progress is reported against `Content-Length` when storage sent one.
  /// Cancellation is checked between chunks.
  pub async fn write_to<W>(self, sink: &mut W, control: &TransferControl) -> Result<u64, TransferError>
  where
    W: AsyncWrite + Unpin + ?Sized,
  {
    let cancel = control.cancel_token();
    let mut tracker = ProgressTracker::new(control.progress.clone(), self.content_length);
    let mut stream = self.stream;

    loop {
      let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          warn!(received = tracker.transferred(), "download cancelled during transfer");
          return Err(TransferError::Cancelled);
        }
        next = stream.next() => next,
      };

      let Some(chunk) = next else {
        break;
      };
      let chunk = chunk?;
      sink.write_all(&chunk).await?;
      tracker.advance(chunk.len());
    }
    sink.flush().await?;

    info!(received = tracker.transferred(), "download_completed");
    Ok(tracker.transferred())
  }
}

impl fmt::Debug for DownloadStream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DownloadStream")
      .field("content_length", &self.content_length)
      .field("content_type", &self.content_type)
      .finish_non_exhaustive()
  }
}

async fn check_status(response: Response) -> Result<Response, TransferError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  Err(TransferError::Status { status, body })
}
