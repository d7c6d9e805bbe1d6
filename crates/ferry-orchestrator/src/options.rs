use ferry_config::TokenConstraints;
use ferry_transfer::TransferControl;

/// Options for a self-service upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
  /// Constraints for the upload token the flow requests.
  pub constraints: TokenConstraints,
  /// Progress and cancellation for the byte transfer.
  pub control: TransferControl,
}

impl UploadOptions {
  pub fn with_constraints(mut self, constraints: TokenConstraints) -> Self {
    self.constraints = constraints;
    self
  }

  pub fn with_control(mut self, control: TransferControl) -> Self {
    self.control = control;
    self
  }
}

/// Options for a self-service download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
  /// Constraints for the download token the flow requests.
  pub constraints: TokenConstraints,
  pub control: TransferControl,
}

impl DownloadOptions {
  pub fn with_constraints(mut self, constraints: TokenConstraints) -> Self {
    self.constraints = constraints;
    self
  }

  pub fn with_control(mut self, control: TransferControl) -> Self {
    self.control = control;
    self
  }
}
