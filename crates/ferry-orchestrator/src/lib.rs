//! Ferry Orchestrator
//!
//! Composes the artifact service client and the transfer executor into the two
//! public flows, upload and download. Each flow is driven by a
//! [`TransferMachine`] that walks the protocol states in order:
//!
//! ```text
//! Idle → TokenRequested → TokenIssued → UrlExchangeRequested → UrlIssued
//!      → Transferring → Transferred → [NotifyingCompletion] → Done
//! ```
//!
//! A self-service flow requests its own token first. A delegated flow starts at
//! `UrlExchangeRequested` with a URL minted out of band. Any step error moves the
//! machine to `Failed` and rejects the call, except completion notification,
//! which is best-effort.

mod error;
mod events;
mod options;
mod orchestrator;
mod state;

pub use error::{FlowError, StepError};
pub use events::{ChannelNotifier, NoopNotifier, TransferEvent, TransferNotifier};
pub use options::{DownloadOptions, UploadOptions};
pub use orchestrator::{
  CompletionOutcome, DELEGATED_DOWNLOAD_FILENAME, DownloadSummary, DownloadedFile,
  TransferOrchestrator, UploadReceipt,
};
pub use state::{Entry, FlowKind, TransferMachine, TransferState};
