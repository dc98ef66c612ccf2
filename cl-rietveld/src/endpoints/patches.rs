//! Patch downloads.

use anyhow::Result;

use crate::client::RietveldClient;

impl RietveldClient {
  /// Raw diff of `patchset` of `issue`.
  pub async fn get_patch(&self, issue: u64, patchset: u64) -> Result<String> {
    self.get(&format!("download/issue{issue}_{patchset}.diff")).await
  }

  /// Diff served at an absolute URL, such as a raw patch link.
  pub async fn get_patch_url(&self, url: &str) -> Result<String> {
    self.get(url).await
  }
}

#[cfg(test)]
mod tests {
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  use crate::endpoints::test_client;

  #[tokio::test]
  async fn test_get_patch() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("GET"))
      .and(path("/download/issue123_4.diff"))
      .respond_with(ResponseTemplate::new(200).set_body_string("diff --git a/x b/x\n"))
      .mount(&server)
      .await;

    assert!(client.get_patch(123, 4).await?.starts_with("diff --git"));
    let url = format!("{}/download/issue123_4.diff", server.uri());
    assert!(client.get_patch_url(&url).await?.starts_with("diff --git"));
    Ok(())
  }
}
