//! # Account Endpoints

use anyhow::Result;
use reqwest::Method;

use crate::client::GerritClient;
use crate::models::AccountInfo;

impl GerritClient {
  /// Details of `account`; `"self"` is the authenticated user.
  pub async fn get_account_details(&self, account: &str) -> Result<AccountInfo> {
    let path = format!("accounts/{account}?o=DETAILS");
    self.call_json(Method::GET, &path, None).await
  }
}
