//! Constants for the cl-rietveld client

/// User-Agent header value for review server requests
pub const USER_AGENT: &str = concat!("git-cl/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Header the server requires before it hands out an XSRF token.
pub const XSRF_REQUEST_HEADER: &str = "X-Requesting-XSRF-Token";

/// Form field carrying the XSRF token on mutating requests.
pub const XSRF_FIELD: &str = "xsrf_token";
