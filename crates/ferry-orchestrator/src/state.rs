//! The transfer state machine.

use std::fmt;
use std::sync::Arc;

use ferry_artifact::ArtifactId;
use ferry_service::ServiceError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{FlowError, StepError};
use crate::events::{TransferEvent, TransferNotifier};

/// Protocol states of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
  Idle,
  TokenRequested,
  TokenIssued,
  UrlExchangeRequested,
  UrlIssued,
  Transferring,
  Transferred,
  /// Uploads only.
  NotifyingCompletion,
  Done,
  Failed,
}

impl TransferState {
  pub fn as_str(&self) -> &'static str {
    match self {
      TransferState::Idle => "idle",
      TransferState::TokenRequested => "token_requested",
      TransferState::TokenIssued => "token_issued",
      TransferState::UrlExchangeRequested => "url_exchange_requested",
      TransferState::UrlIssued => "url_issued",
      TransferState::Transferring => "transferring",
      TransferState::Transferred => "transferred",
      TransferState::NotifyingCompletion => "notifying_completion",
      TransferState::Done => "done",
      TransferState::Failed => "failed",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, TransferState::Done | TransferState::Failed)
  }

  /// The next state on the success path, or `None` from a terminal state.
  pub fn successor(self, flow: FlowKind, entry: Entry) -> Option<TransferState> {
    use TransferState::*;

    let next = match self {
      Idle => match entry {
        Entry::SelfService => TokenRequested,
        Entry::Delegated => UrlExchangeRequested,
      },
      TokenRequested => TokenIssued,
      TokenIssued => UrlExchangeRequested,
      UrlExchangeRequested => UrlIssued,
      UrlIssued => Transferring,
      Transferring => Transferred,
      Transferred => match flow {
        FlowKind::Upload => NotifyingCompletion,
        FlowKind::Download => Done,
      },
      NotifyingCompletion => Done,
      Done | Failed => return None,
    };
    Some(next)
  }
}

impl fmt::Display for TransferState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
  Upload,
  Download,
}

impl fmt::Display for FlowKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FlowKind::Upload => f.write_str("upload"),
      FlowKind::Download => f.write_str("download"),
    }
  }
}

/// How a flow reaches the URL exchange step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entry {
  /// The orchestrator requests its own token.
  SelfService,
  /// The caller supplies a URL minted out of band; no token is requested.
  Delegated,
}

/// Tracks one flow through [`TransferState`] and publishes every transition.
pub struct TransferMachine {
  transfer_id: Uuid,
  flow: FlowKind,
  entry: Entry,
  state: TransferState,
  notifier: Arc<dyn TransferNotifier>,
}

impl TransferMachine {
  /// A flow that requests its own token.
  pub fn self_service(flow: FlowKind, notifier: Arc<dyn TransferNotifier>) -> Self {
    Self::start(flow, Entry::SelfService, notifier)
  }

  /// A flow that starts from a caller-supplied URL.
  pub fn delegated(flow: FlowKind, notifier: Arc<dyn TransferNotifier>) -> Self {
    Self::start(flow, Entry::Delegated, notifier)
  }

  fn start(flow: FlowKind, entry: Entry, notifier: Arc<dyn TransferNotifier>) -> Self {
    Self {
      transfer_id: Uuid::new_v4(),
      flow,
      entry,
      state: TransferState::Idle,
      notifier,
    }
  }

  pub fn transfer_id(&self) -> Uuid {
    self.transfer_id
  }

  pub fn flow(&self) -> FlowKind {
    self.flow
  }

  pub fn entry(&self) -> Entry {
    self.entry
  }

  pub fn state(&self) -> TransferState {
    self.state
  }

  /// Move to `next`, which must be the successor of the current state.
  pub fn enter(&mut self, next: TransferState) {
    debug_assert_eq!(
      self.state.successor(self.flow, self.entry),
      Some(next),
      "illegal transition from {} to {next}",
      self.state
    );
    self.transition(next);
  }

  /// Move to `Failed` and build the error for the state the step failed in.
  pub fn fail(&mut self, source: impl Into<StepError>) -> FlowError {
    let state = self.state;
    self.transition(TransferState::Failed);
    FlowError {
      transfer_id: self.transfer_id,
      flow: self.flow,
      state,
      source: source.into(),
    }
  }

  /// Publish a swallowed completion notification failure.
  pub fn completion_warning(&self, artifact_id: ArtifactId, error: &ServiceError) {
    self.notifier.notify(TransferEvent::CompletionWarning {
      transfer_id: self.transfer_id,
      artifact_id,
      error: error.to_string(),
    });
  }

  fn transition(&mut self, next: TransferState) {
    let from = std::mem::replace(&mut self.state, next);
    debug!(
      transfer_id = %self.transfer_id,
      flow = %self.flow,
      from = %from,
      to = %next,
      "transfer_state_changed"
    );
    self.notifier.notify(TransferEvent::StateChanged {
      transfer_id: self.transfer_id,
      flow: self.flow,
      from,
      to: next,
    });
  }
}

impl fmt::Debug for TransferMachine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TransferMachine")
      .field("transfer_id", &self.transfer_id)
      .field("flow", &self.flow)
      .field("entry", &self.entry)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
