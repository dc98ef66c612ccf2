//! # Gerrit API Client
//!
//! Async client for the Gerrit REST API as used by git-cl: change details and
//! status, commit message edits, reviews and label votes, reviewer
//! management, abandon and submit.

pub mod auth;
pub mod client;
pub mod consts;
pub mod endpoints;
pub mod error;
pub mod models;

pub use client::GerritClient;
pub use error::GerritError;
pub use models::{
  AccountInfo, ApprovalInfo, ChangeInfo, ChangeMessageInfo, CommitInfo, FetchInfo, GerritAuth, LabelInfo, Notify,
  RevisionInfo, WebLinkInfo,
};
