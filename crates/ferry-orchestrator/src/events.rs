//! Transfer events and notifiers for observability.
//!
//! Events are emitted while a flow runs so consumers can render progress through
//! the protocol, persist an audit trail, or assert on the sequence in tests.

use ferry_artifact::ArtifactId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::{FlowKind, TransferState};

/// Events emitted during a transfer flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
  /// The state machine moved to a new state.
  StateChanged {
    transfer_id: Uuid,
    flow: FlowKind,
    from: TransferState,
    to: TransferState,
  },

  /// The upload finished but the service was not told. The flow still succeeds.
  CompletionWarning {
    transfer_id: Uuid,
    artifact_id: ArtifactId,
    error: String,
  },
}

/// Trait for receiving transfer events.
///
/// The orchestrator calls `notify` for each event; implementations decide what
/// to do with them.
pub trait TransferNotifier: Send + Sync {
  fn notify(&self, event: TransferEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl TransferNotifier for NoopNotifier {
  fn notify(&self, _event: TransferEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // NOTE: Unbounded to avoid blocking a transfer if the consumer is slow. The
  // event volume is low (one per state change), so memory growth is unlikely.
  sender: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<TransferEvent>) -> Self {
    Self { sender }
  }
}

impl TransferNotifier for ChannelNotifier {
  fn notify(&self, event: TransferEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
