//! # Error Taxonomy
//!
//! Typed errors for the operation families that callers must tell apart:
//! authentication, missing remote issues, transient and permanent remote
//! failures, user aborts, local precondition violations and broken invariants.

use thiserror::Error;

/// Errors that carry a meaning callers act on.
///
/// Anything not covered here travels as a plain [`anyhow::Error`]; code that
/// needs to react to a specific kind downcasts with
/// [`anyhow::Error::downcast_ref`].
#[derive(Debug, Error)]
pub enum ClError {
  /// No usable credentials for the host.
  #[error("Credentials for the following hosts are required:\n  {host}\n{hint}")]
  AuthRequired { host: String, hint: String },

  /// The remote does not know the issue.
  #[error("Issue {issue} does not exist on {host}. Maybe you have to log in? Use \"git cl issue 0\" to unset it.")]
  RemoteNotFound { issue: u64, host: String },

  /// Network or server hiccup that may succeed when retried.
  #[error("transient failure: {0}")]
  TransientFailure(String),

  /// The server rejected the request and retrying will not help.
  #[error("{0}")]
  FatalRemoteError(String),

  /// The user cancelled a prompt or interrupted a wait.
  #[error("Aborted by user")]
  UserAbort,

  /// Local state does not allow the operation (dirty tree, no upstream, ...).
  #[error("{0}")]
  Precondition(String),

  /// Bad argument or conflicting flags.
  #[error("{0}")]
  InvalidInput(String),

  /// Something that must hold never does: more than one Change-Id, more than
  /// one issue parsed from push output, missing patchset.
  #[error("{0}")]
  Invariant(String),
}

/// Result alias for functions that only fail with a [`ClError`].
pub type ClResult<T> = std::result::Result<T, ClError>;

impl ClError {
  /// Whether a retry policy may try the operation again.
  pub const fn is_transient(&self) -> bool {
    matches!(self, Self::TransientFailure(_))
  }

  /// Process exit code for this error.
  pub const fn exit_code(&self) -> i32 {
    1
  }

  pub fn precondition(msg: impl Into<String>) -> Self {
    Self::Precondition(msg.into())
  }

  pub fn invalid_input(msg: impl Into<String>) -> Self {
    Self::InvalidInput(msg.into())
  }

  pub fn invariant(msg: impl Into<String>) -> Self {
    Self::Invariant(msg.into())
  }

  pub fn fatal_remote(msg: impl Into<String>) -> Self {
    Self::FatalRemoteError(msg.into())
  }

  pub fn transient(msg: impl Into<String>) -> Self {
    Self::TransientFailure(msg.into())
  }
}

/// Returns true when `err` wraps a transient [`ClError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
  err.downcast_ref::<ClError>().is_some_and(ClError::is_transient)
}

/// Returns true when `err` wraps [`ClError::UserAbort`].
pub fn is_user_abort(err: &anyhow::Error) -> bool {
  matches!(err.downcast_ref::<ClError>(), Some(ClError::UserAbort))
}
