//! Ferry Config
//!
//! This crate contains the serializable configuration types for Ferry.
//!
//! - [`ClientConfig`] describes where the artifact service lives and how the
//!   HTTP client talking to it should behave.
//! - [`TokenConstraints`] is the option set attached to every token request
//!   (use limit, activation window, network restriction).
//!
//! Configuration can be loaded from a JSON file or built in code. Neither type
//! validates caller-supplied values; the artifact service is the authority on
//! what it accepts.

mod client;
mod constraints;
mod error;

pub use client::ClientConfig;
pub use constraints::TokenConstraints;
pub use error::ConfigError;
