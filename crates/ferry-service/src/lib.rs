//! Ferry Service
//!
//! Client for the control-plane endpoints of the artifact service:
//!
//! - token issuance (`/genUploadPresignedURL`, `/genDownloadPresignedURL`)
//! - presigned upload URL exchange (`POST <upload_url>`)
//! - completion notification (`/artifact-service/v1/artifacts/{uuid}/complete`)
//! - artifact metadata (`/artifact-service/v1/artifacts/`)
//!
//! The [`ArtifactService`] trait is the seam the orchestrator depends on;
//! [`HttpArtifactService`] is the reqwest-backed implementation. Tokens are
//! opaque: this crate forwards them and never inspects them. Nothing is cached
//! and nothing is retried.

mod error;
mod http;
mod service;
mod types;

pub use error::{CallError, ServiceError};
pub use http::{HttpArtifactService, build_client};
pub use service::ArtifactService;
pub use types::{CompletionAck, IssuedToken, PresignedUpload, TokenScope};
