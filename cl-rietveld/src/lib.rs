//! # Legacy Review Server Client
//!
//! Async client for the Rietveld-style review server: issue properties and
//! messages, descriptions, commit-queue flags, comments, patch downloads and
//! patchset uploads.

pub mod auth;
pub mod client;
pub mod consts;
pub mod endpoints;
pub mod error;
pub mod models;

pub use client::RietveldClient;
pub use endpoints::upload::{UploadRequest, UploadResult};
pub use error::RietveldError;
pub use models::{IssueMessage, IssueProperties, RietveldAuth};
