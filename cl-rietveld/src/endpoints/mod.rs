//! # Review Server Endpoints
//!
//! Issue metadata and flags, patch downloads, and patchset uploads.

pub mod issues;
pub mod patches;
pub mod upload;

#[cfg(test)]
pub(crate) fn test_client(server: &wiremock::MockServer) -> crate::RietveldClient {
  let mut client = crate::RietveldClient::new(
    "codereview.example.com",
    Some(crate::RietveldAuth {
      username: "user".to_string(),
      password: "secret".to_string(),
    }),
  )
  .with_retry(cl_core::RetryPolicy::new(2));
  client.base_url = server.uri();
  client
}
