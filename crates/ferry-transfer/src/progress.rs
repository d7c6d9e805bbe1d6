//! Progress reporting and cancellation wiring for a single transfer.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use ferry_artifact::ByteStream;
use futures::Stream;
use tokio_util::sync::CancellationToken;

/// Receives transfer progress as a whole percentage in `0..=100`.
///
/// Values reported for one transfer never decrease.
pub trait ProgressSink: Send + Sync {
  fn report(&self, percent: u8);
}

impl<F> ProgressSink for F
where
  F: Fn(u8) + Send + Sync,
{
  fn report(&self, percent: u8) {
    self(percent)
  }
}

/// Optional progress sink and cancellation token for one transfer.
#[derive(Clone, Default)]
pub struct TransferControl {
  pub progress: Option<Arc<dyn ProgressSink>>,
  pub cancel: Option<CancellationToken>,
}

impl TransferControl {
  pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
    self.progress = Some(Arc::new(sink));
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = Some(cancel);
    self
  }

  /// The caller's token, or a fresh one that is never cancelled.
  pub fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone().unwrap_or_else(CancellationToken::new)
  }
}

impl fmt::Debug for TransferControl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TransferControl")
      .field("progress", &self.progress.is_some())
      .field("cancel", &self.cancel)
      .finish()
  }
}

/// Turns byte counts into percentages and reports each new value once.
///
/// Without a declared total (or with a total of zero) nothing is reported.
pub(crate) struct ProgressTracker {
  sink: Option<Arc<dyn ProgressSink>>,
  total: Option<u64>,
  transferred: u64,
  last_reported: Option<u8>,
}

impl ProgressTracker {
  pub(crate) fn new(sink: Option<Arc<dyn ProgressSink>>, total: Option<u64>) -> Self {
    Self {
      sink,
      total: total.filter(|t| *t > 0),
      transferred: 0,
      last_reported: None,
    }
  }

  pub(crate) fn transferred(&self) -> u64 {
    self.transferred
  }

  /// Record `bytes` more transferred and report if the percentage moved.
  pub(crate) fn advance(&mut self, bytes: usize) {
    self.transferred = self.transferred.saturating_add(bytes as u64);

    let (Some(sink), Some(total)) = (&self.sink, self.total) else {
      return;
    };

    let percent = percent_of(self.transferred, total);
    if self.last_reported.is_none_or(|last| percent > last) {
      self.last_reported = Some(percent);
      sink.report(percent);
    }
  }
}

/// `done / total` as a rounded percentage, clamped to 100.
fn percent_of(done: u64, total: u64) -> u8 {
  let done = u128::from(done.min(total));
  let total = u128::from(total);
  ((done * 100 + total / 2) / total) as u8
}

/// Upload body wrapper: counts bytes as they are handed to the transport and
/// stops yielding once the transfer is cancelled.
pub(crate) struct ProgressStream {
  inner: ByteStream,
  tracker: ProgressTracker,
  cancel: CancellationToken,
}

impl ProgressStream {
  pub(crate) fn new(inner: ByteStream, tracker: ProgressTracker, cancel: CancellationToken) -> Self {
    Self {
      inner,
      tracker,
      cancel,
    }
  }
}

impl Stream for ProgressStream {
  type Item = Result<Bytes, std::io::Error>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();

    if this.cancel.is_cancelled() {
      return Poll::Ready(Some(Err(std::io::Error::new(
        std::io::ErrorKind::Interrupted,
        "transfer cancelled",
      ))));
    }

    let item = ready!(this.inner.as_mut().poll_next(cx));
    if let Some(Ok(chunk)) = &item {
      this.tracker.advance(chunk.len());
    }
    Poll::Ready(item)
  }
}
