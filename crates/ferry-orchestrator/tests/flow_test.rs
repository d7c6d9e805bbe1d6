//! End-to-end flow tests against a mock artifact service and object store.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use ferry_artifact::UploadFile;
use ferry_config::{ClientConfig, TokenConstraints};
use ferry_orchestrator::{
  ChannelNotifier, CompletionOutcome, DELEGATED_DOWNLOAD_FILENAME, DownloadOptions,
  TransferEvent, TransferNotifier, TransferOrchestrator, TransferState, UploadOptions,
};
use ferry_transfer::TransferControl;
use reqwest::StatusCode;
use serde_json::json;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const U1: &str = "0b9f6d5e-3c2a-4e8f-9a71-5d4c3b2a1f00";

fn orchestrator(server: &MockServer) -> TransferOrchestrator {
  let config = ClientConfig::new(&server.uri()).expect("valid base url");
  TransferOrchestrator::new(config).expect("failed to build client")
}

fn recorder() -> (Arc<Mutex<Vec<u8>>>, TransferControl) {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink_seen = seen.clone();
  let control = TransferControl::default().with_progress(move |p: u8| sink_seen.lock().unwrap().push(p));
  (seen, control)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}

fn states(events: &[TransferEvent]) -> Vec<TransferState> {
  events
    .iter()
    .filter_map(|e| match e {
      TransferEvent::StateChanged { to, .. } => Some(*to),
      _ => None,
    })
    .collect()
}

/// Mount token issuance, URL exchange and storage PUT for artifact `U1`.
async fn mount_upload_path(server: &MockServer) {
  Mock::given(method("POST"))
    .and(path("/genUploadPresignedURL"))
    .and(body_json(json!({
      "max_uploads": 1,
      "valid_from": null,
      "valid_to": null,
      "allowed_cidr": null,
    })))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "token": "tok-1",
      "upload_url": format!("{}/artifacts/upload/tok-1", server.uri()),
      "type": "upload",
    })))
    .expect(1)
    .mount(server)
    .await;

  mount_exchange_and_storage(server).await;
}

async fn mount_exchange_and_storage(server: &MockServer) {
  Mock::given(method("POST"))
    .and(path("/artifacts/upload/tok-1"))
    .and(body_json(json!({
      "filename": "a.txt",
      "content_type": "text/plain",
      "size": 10,
    })))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "presigned_url": format!("{}/bucket/{U1}", server.uri()),
      "uuid": U1,
    })))
    .expect(1)
    .mount(server)
    .await;

  Mock::given(method("PUT"))
    .and(path(format!("/bucket/{U1}")))
    .respond_with(ResponseTemplate::new(200))
    .expect(1)
    .mount(server)
    .await;
}

fn payload() -> UploadFile {
  UploadFile::from_bytes("a.txt", Some("text/plain"), &b"0123456789"[..])
}

#[tokio::test]
async fn test_self_service_upload() {
  let server = MockServer::start().await;
  mount_upload_path(&server).await;
  Mock::given(method("POST"))
    .and(path(format!("/artifact-service/v1/artifacts/{U1}/complete")))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "UPLOADED"})))
    .expect(1)
    .mount(&server)
    .await;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let (seen, control) = recorder();
  let receipt = orchestrator(&server)
    .with_notifier(ChannelNotifier::new(tx))
    .upload(
      payload(),
      UploadOptions::default()
        .with_constraints(TokenConstraints::default().max_uses(1))
        .with_control(control),
    )
    .await
    .unwrap();

  assert_eq!(receipt.artifact_id, Uuid::parse_str(U1).unwrap());
  assert_eq!(receipt.filename, "a.txt");
  assert_eq!(receipt.size, Some(10));
  assert_eq!(receipt.token.as_deref(), Some("tok-1"));
  assert_eq!(
    receipt.completion,
    CompletionOutcome::Acknowledged(json!({"status": "UPLOADED"}))
  );
  assert_eq!(*seen.lock().unwrap(), vec![100]);

  use TransferState::*;
  assert_eq!(
    states(&drain(&mut rx)),
    vec![
      TokenRequested,
      TokenIssued,
      UrlExchangeRequested,
      UrlIssued,
      Transferring,
      Transferred,
      NotifyingCompletion,
      Done
    ]
  );
}

#[tokio::test]
async fn test_completion_failure_is_a_warning() {
  let server = MockServer::start().await;
  mount_upload_path(&server).await;
  Mock::given(method("POST"))
    .and(path(format!("/artifact-service/v1/artifacts/{U1}/complete")))
    .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
    .expect(1)
    .mount(&server)
    .await;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let receipt = orchestrator(&server)
    .with_notifier(ChannelNotifier::new(tx))
    .upload(payload(), UploadOptions::default())
    .await
    .unwrap();

  assert_eq!(receipt.artifact_id, Uuid::parse_str(U1).unwrap());
  assert!(!receipt.completion.is_acknowledged());

  let events = drain(&mut rx);
  assert!(events.iter().any(|e| matches!(
    e,
    TransferEvent::CompletionWarning { artifact_id, .. } if artifact_id.to_string() == U1
  )));
  assert_eq!(states(&events).last(), Some(&TransferState::Done));
}

#[tokio::test]
async fn test_delegated_upload_skips_token_service() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/genUploadPresignedURL"))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;
  mount_exchange_and_storage(&server).await;
  Mock::given(method("POST"))
    .and(path(format!("/artifact-service/v1/artifacts/{U1}/complete")))
    .respond_with(ResponseTemplate::new(200))
    .expect(1)
    .mount(&server)
    .await;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let upload_url = Url::parse(&format!("{}/artifacts/upload/tok-1", server.uri())).unwrap();
  let receipt = orchestrator(&server)
    .with_notifier(ChannelNotifier::new(tx))
    .upload_with_token_url(&upload_url, payload(), TransferControl::default())
    .await
    .unwrap();

  assert_eq!(receipt.token, None);
  assert_eq!(receipt.completion, CompletionOutcome::Acknowledged(serde_json::Value::Null));
  assert_eq!(
    states(&drain(&mut rx)).first(),
    Some(&TransferState::UrlExchangeRequested)
  );
}

#[tokio::test]
async fn test_token_rejection_fails_at_token_requested() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/genUploadPresignedURL"))
    .respond_with(ResponseTemplate::new(403).set_body_string("source address not allowed"))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/artifacts/upload/tok-1"))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let err = orchestrator(&server)
    .with_notifier(ChannelNotifier::new(tx))
    .upload(
      payload(),
      UploadOptions::default()
        .with_constraints(TokenConstraints::default().allowed_cidr("10.0.0.0/8")),
    )
    .await
    .unwrap_err();

  assert_eq!(err.failed_at(), TransferState::TokenRequested);
  assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
  assert!(!err.is_cancelled());
  assert_eq!(
    states(&drain(&mut rx)),
    vec![TransferState::TokenRequested, TransferState::Failed]
  );
}

#[tokio::test]
async fn test_cancelled_upload_sends_no_bytes() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/genUploadPresignedURL"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "token": "tok-1",
      "upload_url": format!("{}/artifacts/upload/tok-1", server.uri()),
    })))
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/artifacts/upload/tok-1"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "presigned_url": format!("{}/bucket/{U1}", server.uri()),
      "uuid": U1,
    })))
    .mount(&server)
    .await;
  Mock::given(method("PUT"))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path(format!("/artifact-service/v1/artifacts/{U1}/complete")))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;

  let cancel = CancellationToken::new();
  cancel.cancel();
  let err = orchestrator(&server)
    .upload(
      payload(),
      UploadOptions::default().with_control(TransferControl::default().with_cancel(cancel)),
    )
    .await
    .unwrap_err();

  assert!(err.is_cancelled());
  assert_eq!(err.failed_at(), TransferState::Transferring);
}

#[tokio::test]
async fn test_delegated_download_follows_redirect_without_token() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/genDownloadPresignedURL"))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path("/artifacts/download/tok-9"))
    .respond_with(
      ResponseTemplate::new(302).insert_header("location", format!("{}/bucket/{U1}", server.uri())),
    )
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path(format!("/bucket/{U1}")))
    .respond_with(
      ResponseTemplate::new(200)
        .insert_header("content-type", "text/plain")
        .set_body_bytes(b"0123456789".to_vec()),
    )
    .expect(1)
    .mount(&server)
    .await;

  let url = Url::parse(&format!("{}/artifacts/download/tok-9", server.uri())).unwrap();
  let file = orchestrator(&server)
    .download_with_token_url(&url, TransferControl::default())
    .await
    .unwrap();

  assert_eq!(&file.bytes[..], b"0123456789");
  assert_eq!(file.content_type.as_deref(), Some("text/plain"));
  assert_eq!(file.suggested_filename, DELEGATED_DOWNLOAD_FILENAME);
}

#[tokio::test]
async fn test_self_service_download() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/genDownloadPresignedURL"))
    .and(body_json(json!({
      "artifact_uuid": U1,
      "max_downloads": 1,
      "valid_from": null,
      "valid_to": null,
      "allowed_cidr": null,
    })))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "token": "tok-9",
      "presigned_url": format!("{}/bucket/{U1}", server.uri()),
    })))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path(format!("/bucket/{U1}")))
    .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
    .expect(1)
    .mount(&server)
    .await;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let file = orchestrator(&server)
    .with_notifier(ChannelNotifier::new(tx))
    .download(Uuid::parse_str(U1).unwrap(), DownloadOptions::default())
    .await
    .unwrap();

  assert_eq!(&file.bytes[..], b"payload");
  assert_eq!(file.suggested_filename, U1);

  let states = states(&drain(&mut rx));
  assert!(!states.contains(&TransferState::NotifyingCompletion));
  assert_eq!(states.last(), Some(&TransferState::Done));
}

#[tokio::test]
async fn test_download_storage_error_fails_at_transferring() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .respond_with(ResponseTemplate::new(403).set_body_string("Request has expired"))
    .mount(&server)
    .await;

  let url = Url::parse(&format!("{}/bucket/{U1}", server.uri())).unwrap();
  let err = orchestrator(&server)
    .download_with_token_url(&url, TransferControl::default())
    .await
    .unwrap_err();

  assert_eq!(err.failed_at(), TransferState::Transferring);
  assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
}

#[tokio::test]
async fn test_get_artifact_not_found() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/artifact-service/v1/artifacts/"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
      "uuid": U1,
      "filename": "a.txt",
      "content_type": "text/plain",
      "size": 10,
    }])))
    .mount(&server)
    .await;

  let orchestrator = orchestrator(&server);
  let found = orchestrator.get_artifact(Uuid::parse_str(U1).unwrap()).await.unwrap();
  assert_eq!(found.filename, "a.txt");

  let err = orchestrator.get_artifact(Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, ferry_service::ServiceError::ArtifactNotFound(_)));
}

/// Cancels a token as soon as the flow enters `state`.
struct CancelOnEnter {
  state: TransferState,
  cancel: CancellationToken,
}

impl TransferNotifier for CancelOnEnter {
  fn notify(&self, event: TransferEvent) {
    if let TransferEvent::StateChanged { to, .. } = event {
      if to == self.state {
        self.cancel.cancel();
      }
    }
  }
}

/// A sink that cancels the transfer after accepting its first write.
struct CancelAfterFirstWrite {
  cancel: CancellationToken,
  written: Vec<u8>,
}

impl AsyncWrite for CancelAfterFirstWrite {
  fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
    let this = self.get_mut();
    this.written.extend_from_slice(buf);
    this.cancel.cancel();
    Poll::Ready(Ok(buf.len()))
  }

  fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    Poll::Ready(Ok(()))
  }

  fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    Poll::Ready(Ok(()))
  }
}

#[tokio::test]
async fn test_cancel_after_transfer_is_a_no_op() {
  let server = MockServer::start().await;
  mount_upload_path(&server).await;
  Mock::given(method("POST"))
    .and(path(format!("/artifact-service/v1/artifacts/{U1}/complete")))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "UPLOADED"})))
    .expect(1)
    .mount(&server)
    .await;

  let cancel = CancellationToken::new();
  let receipt = orchestrator(&server)
    .with_notifier(CancelOnEnter {
      state: TransferState::NotifyingCompletion,
      cancel: cancel.clone(),
    })
    .upload(
      payload(),
      UploadOptions::default().with_control(TransferControl::default().with_cancel(cancel.clone())),
    )
    .await
    .unwrap();

  assert!(cancel.is_cancelled());
  assert_eq!(receipt.artifact_id, Uuid::parse_str(U1).unwrap());
  assert!(receipt.completion.is_acknowledged());
}

#[tokio::test]
async fn test_exchange_rejection_fails_at_url_exchange() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/genUploadPresignedURL"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "token": "tok-1",
      "upload_url": format!("{}/artifacts/upload/tok-1", server.uri()),
    })))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/artifacts/upload/tok-1"))
    .respond_with(ResponseTemplate::new(403).set_body_string("token already used"))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("PUT"))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path(format!("/artifact-service/v1/artifacts/{U1}/complete")))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;

  let err = orchestrator(&server)
    .upload(payload(), UploadOptions::default())
    .await
    .unwrap_err();

  assert_eq!(err.failed_at(), TransferState::UrlExchangeRequested);
  assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
  assert!(matches!(
    err.source,
    ferry_orchestrator::StepError::Service(ferry_service::ServiceError::PresignedUrl { .. })
  ));
}

#[tokio::test]
async fn test_delegated_exchange_rejection() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/genUploadPresignedURL"))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/artifacts/upload/expired"))
    .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("PUT"))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let upload_url = Url::parse(&format!("{}/artifacts/upload/expired", server.uri())).unwrap();
  let err = orchestrator(&server)
    .with_notifier(ChannelNotifier::new(tx))
    .upload_with_token_url(&upload_url, payload(), TransferControl::default())
    .await
    .unwrap_err();

  assert_eq!(err.failed_at(), TransferState::UrlExchangeRequested);
  assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
  assert_eq!(
    states(&drain(&mut rx)),
    vec![TransferState::UrlExchangeRequested, TransferState::Failed]
  );
}

#[tokio::test]
async fn test_download_cancelled_mid_stream() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path(format!("/bucket/{U1}")))
    .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64 * 1024]))
    .expect(1)
    .mount(&server)
    .await;

  let cancel = CancellationToken::new();
  let mut sink = CancelAfterFirstWrite {
    cancel: cancel.clone(),
    written: Vec::new(),
  };
  let url = Url::parse(&format!("{}/bucket/{U1}", server.uri())).unwrap();
  let err = orchestrator(&server)
    .download_with_token_url_to(&url, TransferControl::default().with_cancel(cancel), &mut sink)
    .await
    .unwrap_err();

  assert!(err.is_cancelled());
  assert_eq!(err.failed_at(), TransferState::Transferring);
  assert!(!sink.written.is_empty());
}

#[tokio::test]
async fn test_download_streams_into_sink() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/genDownloadPresignedURL"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "token": "tok-9",
      "presigned_url": format!("{}/bucket/{U1}", server.uri()),
    })))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path(format!("/bucket/{U1}")))
    .respond_with(
      ResponseTemplate::new(200)
        .insert_header("content-type", "application/pdf")
        .set_body_bytes(b"%PDF-1.7".to_vec()),
    )
    .expect(1)
    .mount(&server)
    .await;

  let mut sink = Vec::new();
  let summary = orchestrator(&server)
    .download_to(Uuid::parse_str(U1).unwrap(), DownloadOptions::default(), &mut sink)
    .await
    .unwrap();

  assert_eq!(sink, b"%PDF-1.7");
  assert_eq!(summary.size, 8);
  assert_eq!(summary.content_type.as_deref(), Some("application/pdf"));
  assert_eq!(summary.suggested_filename, U1);
}
