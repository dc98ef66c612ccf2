//! # Credential Management
//!
//! Review servers are authenticated with credentials from the user's
//! `.netrc`, keyed by host name.

pub mod netrc;

/// Represents credentials for a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}
