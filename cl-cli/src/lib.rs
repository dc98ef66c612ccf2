//! # git-cl Library
//!
//! Changelist management for Rietveld and Gerrit code review: the
//! changelist model, the review backends, the upload and land protocols,
//! status aggregation and try jobs, plus the clap command surface built on
//! top of them.

pub mod backend;
pub mod changelist;
pub mod cli;
pub mod clients;
pub mod completion;
pub mod consts;
pub mod context;
pub mod git;
pub mod git_numberer;
pub mod hooks;
pub mod land;
pub mod owners;
pub mod status;
pub mod tree_status;
pub mod tryjobs;
pub mod upload;
pub mod watchlists;
