//! Transfer errors.

use reqwest::StatusCode;

/// Errors that can occur while moving bytes to or from storage.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
  /// The caller cancelled the transfer.
  #[error("transfer cancelled")]
  Cancelled,

  /// Storage answered with a non-success status.
  #[error("storage responded with {status}: {body}")]
  Status { status: StatusCode, body: String },

  /// The request failed before storage produced a status (connect, reset, body read).
  #[error("transfer request failed: {0}")]
  Request(#[from] reqwest::Error),

  /// Downloaded bytes could not be written to the caller's sink.
  #[error("failed to write download: {0}")]
  Write(#[from] std::io::Error),
}

impl TransferError {
  /// Whether the caller asked for this outcome, as opposed to a network or storage failure.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, TransferError::Cancelled)
  }

  pub fn status(&self) -> Option<StatusCode> {
    match self {
      TransferError::Status { status, .. } => Some(*status),
      TransferError::Request(e) => e.status(),
      TransferError::Cancelled | TransferError::Write(_) => None,
    }
  }
}
