//! Ferry Artifact
//!
//! This crate provides the artifact data model shared by the Ferry crates.
//! An artifact is the service-side record of one uploaded file. It is created
//! in the `PENDING` state when a presigned upload URL is issued and becomes
//! `UPLOADED` once the service learns the bytes have landed in storage, either
//! through the client's completion notification or its own reconciliation.
//!
//! [`UploadFile`] pairs a [`FileDescriptor`] with a streaming body so large
//! files never have to be held in memory.

mod payload;

pub use payload::UploadFile;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Identifier assigned by the service when an upload URL is issued.
pub type ArtifactId = uuid::Uuid;

/// Content type used when the caller does not know one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A boxed stream of bytes for upload bodies.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync>>;

/// Error type for payload sources.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The file to upload does not exist.
  #[error("file not found: {0}")]
  NotFound(std::path::PathBuf),

  /// The path has no usable file name component.
  #[error("path has no file name: {0}")]
  InvalidFilename(std::path::PathBuf),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Lifecycle status of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArtifactStatus {
  /// An upload URL was issued; bytes may not be in storage yet.
  Pending,
  /// The bytes are in storage.
  Uploaded,
  /// The upload window closed without the bytes arriving.
  Expired,
  /// A status this client does not recognize.
  #[serde(other)]
  Unknown,
}

/// Artifact metadata as listed by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
  pub uuid: ArtifactId,
  pub filename: String,
  pub content_type: String,
  pub size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<ArtifactStatus>,
}

impl Artifact {
  pub fn is_uploaded(&self) -> bool {
    self.status == Some(ArtifactStatus::Uploaded)
  }
}

/// File metadata sent when exchanging an upload URL for a presigned URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
  pub filename: String,
  pub content_type: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub size: Option<u64>,
}

impl FileDescriptor {
  /// Describe a file, falling back to [`DEFAULT_CONTENT_TYPE`] when the content type
  /// is unknown or empty.
  pub fn new(filename: impl Into<String>, content_type: Option<&str>, size: Option<u64>) -> Self {
    let content_type = content_type
      .filter(|ct| !ct.trim().is_empty())
      .unwrap_or(DEFAULT_CONTENT_TYPE)
      .to_string();

    Self {
      filename: filename.into(),
      content_type,
      size,
    }
  }
}
