//! # Gerrit API Endpoints
//!
//! Endpoint implementations grouped by resource: changes (details, commit
//! message edits, abandon, submit), reviews (votes, messages, reviewers) and
//! accounts.

pub mod accounts;
pub mod changes;
pub mod review;

/// Percent-encode a change identifier for use in a URL path.
pub(crate) fn encode_change_id(change: &str) -> String {
  url::form_urlencoded::byte_serialize(change.as_bytes()).collect()
}

#[cfg(test)]
pub(crate) fn test_client(server: &wiremock::MockServer) -> crate::GerritClient {
  let mut client = crate::GerritClient::new(
    "review.example.com",
    Some(crate::GerritAuth {
      username: "user".to_string(),
      password: "secret".to_string(),
    }),
  )
  .with_retry(cl_core::RetryPolicy::new(2));
  client.base_url = server.uri();
  client
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_change_id() {
    assert_eq!(encode_change_id("123"), "123");
    assert_eq!(encode_change_id("proj/sub~main~I1"), "proj%2Fsub%7Emain%7EI1");
  }
}
