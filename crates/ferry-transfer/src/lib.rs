//! Direct byte transfers for ferry.
//!
//! This crate provides the [`TransferExecutor`], which moves bytes between the
//! caller and the object store using presigned URLs:
//! - Streaming uploads (`PUT`) with progress reporting
//! - Downloads (`GET`) that follow the storage redirect
//! - Cooperative cancellation via [`CancellationToken`](tokio_util::sync::CancellationToken)
//!
//! Presigned URLs are capabilities: no further authorization is attached to
//! these requests.

mod error;
mod executor;
mod progress;

pub use error::TransferError;
pub use executor::{DownloadStream, TransferExecutor, TransferRequest};
pub use progress::{ProgressSink, TransferControl};
