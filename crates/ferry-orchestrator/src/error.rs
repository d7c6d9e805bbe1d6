use ferry_service::ServiceError;
use ferry_transfer::TransferError;
use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::state::{FlowKind, TransferState};

/// The component error behind a failed flow.
#[derive(Debug, Error)]
pub enum StepError {
  #[error(transparent)]
  Service(#[from] ServiceError),

  #[error(transparent)]
  Transfer(#[from] TransferError),
}

/// A transfer flow that ended in `Failed`.
#[derive(Debug, Error)]
#[error("{flow} {transfer_id} failed at {state}: {source}")]
pub struct FlowError {
  pub transfer_id: Uuid,
  pub flow: FlowKind,
  /// The state the machine was in when the step failed.
  pub state: TransferState,
  #[source]
  pub source: StepError,
}

impl FlowError {
  pub fn failed_at(&self) -> TransferState {
    self.state
  }

  /// Whether the caller cancelled the transfer, as opposed to a service, network
  /// or storage failure.
  pub fn is_cancelled(&self) -> bool {
    matches!(&self.source, StepError::Transfer(e) if e.is_cancelled())
  }

  /// Transport status of the failed call, if one was received.
  pub fn status(&self) -> Option<StatusCode> {
    match &self.source {
      StepError::Service(e) => e.status(),
      StepError::Transfer(e) => e.status(),
    }
  }
}
