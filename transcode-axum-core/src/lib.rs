//! Core protocol types for gRPC JSON transcoding.
//!
//! This crate provides the protocol-level pieces shared by the
//! `transcode-axum` gateway and anything that produces statuses for it.
//!
//! ## Modules
//!
//! - [`error`]: Status codes, the [`Status`] error type and the HTTP mapping table
//! - [`metadata`]: Call metadata with ASCII and binary values
//! - [`protocol`]: Header names, header filtering and binary header encoding

mod error;
mod metadata;
mod protocol;
#[cfg(feature = "tonic")]
mod tonic;

pub use error::*;
pub use metadata::*;
pub use protocol::*;
