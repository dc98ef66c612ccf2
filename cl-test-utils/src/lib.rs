//! Test utilities shared across the git-cl workspace
//!
//! - Throwaway git repositories with a `main` branch ([`GitRepoTestGuard`])
//! - Scoped environment variable overrides ([`EnvTestGuard`])
//! - An isolated `HOME` holding a `.netrc` ([`NetrcGuard`])
//!
//! Guards that touch process-wide state (cwd, environment) restore it on drop.

#![allow(dead_code)]

pub mod env;
pub mod git;
pub mod netrc;

pub use env::EnvTestGuard;
pub use git::{GitRepoTestGuard, checkout_branch, create_branch, create_commit, set_upstream};
pub use netrc::NetrcGuard;
