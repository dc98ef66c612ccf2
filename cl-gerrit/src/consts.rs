//! Constants for the cl-gerrit client

/// User-Agent header value for Gerrit requests
pub const USER_AGENT: &str = concat!("git-cl/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Prefix Gerrit puts in front of every JSON response to defeat XSSI.
pub const XSSI_PREFIX: &str = ")]}'";

/// Path prefix for authenticated REST calls.
pub const AUTHENTICATED_PREFIX: &str = "a/";

/// Label carrying review approval.
pub const CODE_REVIEW_LABEL: &str = "Code-Review";

/// Label driving the commit queue.
pub const COMMIT_QUEUE_LABEL: &str = "Commit-Queue";
