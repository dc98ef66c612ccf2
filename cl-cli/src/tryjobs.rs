//! # Try Jobs
//!
//! Scheduling and listing try jobs on a Buildbucket-style service. Jobs are
//! grouped into a batch keyed by bucket and builder, and tagged with a
//! `buildset` naming the patchset so results can be searched for later.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use cl_core::consts::{BUILDERS_MAP_URL, MASTER_PREFIX};
use cl_core::output::format_build_section;
use cl_core::{BackendKind, ClError, RetryPolicy, print_warning};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::changelist::Changelist;
use crate::consts::TRYJOB_CATEGORY;

/// Bucket name to builder name to test filters.
pub type BucketMap = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Error)]
pub enum BuildbucketError {
  #[error("Access denied: {0}")]
  AccessDenied(String),

  #[error("Error in response. Reason: {reason}. Message: {message}.")]
  Response { reason: String, message: String },

  #[error("Buildbucket returned HTTP {status} for {url}: {body}")]
  Http { status: u16, url: String, body: String },

  #[error("Buildbucket returns invalid json content: {0}")]
  InvalidJson(String),

  #[error("Failed to reach {url}: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },
}

impl BuildbucketError {
  pub const fn is_transient(&self) -> bool {
    match self {
      Self::Http { status, .. } => *status >= 500,
      Self::InvalidJson(_) | Self::Transport { .. } => true,
      Self::AccessDenied(_) | Self::Response { .. } => false,
    }
  }
}

fn is_transient(err: &anyhow::Error) -> bool {
  err.downcast_ref::<BuildbucketError>().is_some_and(BuildbucketError::is_transient)
}

/// One build as reported by the search endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Build {
  pub id: String,
  #[serde(default)]
  pub bucket: String,
  #[serde(default)]
  pub status: String,
  pub result: Option<String>,
  pub failure_reason: Option<String>,
  pub url: Option<String>,
  pub parameters_json: Option<String>,
}

impl Build {
  pub fn builder_name(&self) -> Option<String> {
    let parameters: Value = serde_json::from_str(self.parameters_json.as_deref()?).ok()?;
    parameters.get("builder_name")?.as_str().map(str::to_string)
  }

  /// Bucket without the `master.` prefix.
  pub fn short_bucket(&self) -> &str {
    unprefix_master(&self.bucket)
  }
}

/// Full bucket name for a master given in its short form.
pub fn prefix_master(master: &str) -> String {
  if master.starts_with(MASTER_PREFIX) {
    master.to_string()
  } else {
    format!("{MASTER_PREFIX}{master}")
  }
}

pub fn unprefix_master(bucket: &str) -> &str {
  bucket.strip_prefix(MASTER_PREFIX).unwrap_or(bucket)
}

/// `key=value` properties; values that parse as JSON are kept as JSON.
pub fn parse_properties(raw: &[String]) -> Result<Map<String, Value>> {
  let bad: Vec<&str> = raw.iter().filter(|p| !p.contains('=')).map(String::as_str).collect();
  if !bad.is_empty() {
    return Err(ClError::invalid_input(format!("Got properties with missing \"=\": {bad:?}")).into());
  }
  Ok(
    raw
      .iter()
      .filter_map(|p| p.split_once('='))
      .map(|(key, value)| {
        let value = serde_json::from_str(value).unwrap_or_else(|_not_json| Value::String(value.to_string()));
        (key.to_string(), value)
      })
      .collect(),
  )
}

/// Buckets for `builders` according to a builder-to-masters map.
pub fn bucket_map_for_builders(builders: &[String], builders_map: &HashMap<String, Vec<String>>) -> Result<BucketMap> {
  let mut buckets = BucketMap::new();
  for builder in builders {
    let masters = builders_map.get(builder).map(Vec::as_slice).unwrap_or_default();
    let master = match masters {
      [] => return Err(ClError::invalid_input(format!("No matching master for builder {builder}.")).into()),
      [master] => master,
      _ => {
        return Err(
          ClError::invalid_input(format!("The builder name {builder} exists in multiple masters {masters:?}.")).into(),
        );
      }
    };
    buckets
      .entry(prefix_master(master))
      .or_default()
      .insert(builder.clone(), Vec::new());
  }
  Ok(buckets)
}

/// `patch/<backend>/<host>/<issue>/<patchset>`.
pub fn buildset(kind: BackendKind, codereview_host: &str, issue: u64, patchset: u64) -> String {
  format!("patch/{}/{codereview_host}/{issue}/{patchset}", kind.name())
}

/// Everything shared by the builds of one batch.
#[derive(Debug, Clone)]
pub struct TryJobRequest {
  pub buckets: BucketMap,
  pub properties: Map<String, Value>,
  pub owner_email: Option<String>,
  pub revision: Option<String>,
  pub buildset: String,
}

impl TryJobRequest {
  /// Body of the batch PUT, one build per builder.
  pub fn batch_body(&self) -> Value {
    let mut builds = Vec::new();
    for (bucket, builders) in &self.buckets {
      let master = bucket.starts_with(MASTER_PREFIX).then(|| unprefix_master(bucket));
      for (builder, tests) in builders {
        let mut properties = self.properties.clone();
        if builder.to_lowercase().contains("presubmit") {
          properties.insert("dry_run".into(), json!("true"));
        }
        if !tests.is_empty() {
          properties.insert("testfilter".into(), json!(tests));
        }
        let mut tags = vec![
          format!("builder:{builder}"),
          format!("buildset:{}", self.buildset),
          "user_agent:git_cl_try".to_string(),
        ];
        if let Some(master) = master {
          properties.insert("master".into(), json!(master));
          tags.push(format!("master:{master}"));
        }
        let parameters = json!({
          "builder_name": builder,
          "changes": [{"author": {"email": self.owner_email}, "revision": self.revision}],
          "properties": properties,
        });
        builds.push(json!({
          "bucket": bucket,
          "parameters_json": parameters.to_string(),
          "client_operation_id": Uuid::new_v4().to_string(),
          "tags": tags,
        }));
      }
    }
    json!({ "builds": builds })
  }

  /// What was scheduled, for the user.
  pub fn summary(&self) -> String {
    let mut lines = vec!["Tried jobs on:".to_string()];
    for (bucket, builders) in &self.buckets {
      lines.push(format!("Bucket: {bucket}"));
      for (builder, tests) in builders {
        lines.push(format!("  {builder}: {tests:?}"));
      }
    }
    lines.push("To see results here, run:        git cl try-results".to_string());
    lines.push("To see results in browser, run:  git cl web".to_string());
    lines.join("\n")
  }
}

/// Client for the build scheduling service.
pub struct BuildbucketClient {
  client: Client,
  base_url: String,
  token: Option<String>,
  retry: RetryPolicy,
}

impl BuildbucketClient {
  /// `host` is a bare host or a URL.
  pub fn new(host: &str, token: Option<String>) -> Self {
    let base_url = if host.starts_with("http://") || host.starts_with("https://") {
      host.trim_end_matches('/').to_string()
    } else {
      format!("https://{host}")
    };
    Self {
      client: Client::new(),
      base_url,
      token,
      retry: RetryPolicy::buildbucket(),
    }
  }

  pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  async fn send_once(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value, BuildbucketError> {
    debug!("Buildbucket {method} {url}");
    let mut request = self.client.request(method, url);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.json(body);
    }
    let transport = |source| BuildbucketError::Transport {
      url: url.to_string(),
      source,
    };
    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    let text = response.text().await.map_err(transport)?;
    let content: Option<Value> = serde_json::from_str(&text).ok();

    // Errors may come with a 200.
    if let Some(error) = content.as_ref().and_then(|c| c.get("error")) {
      let message = error.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
      if error.get("code").and_then(Value::as_u64) == Some(403) {
        return Err(BuildbucketError::AccessDenied(message));
      }
      let reason = error.get("reason").and_then(Value::as_str).unwrap_or_default().to_string();
      return Err(BuildbucketError::Response { reason, message });
    }
    if !status.is_success() {
      return Err(BuildbucketError::Http {
        status: status.as_u16(),
        url: url.to_string(),
        body: text,
      });
    }
    content.ok_or(BuildbucketError::InvalidJson(text))
  }

  async fn call(&self, operation: &str, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
    self
      .retry
      .run_async(
        operation,
        |_| {
          let method = method.clone();
          async move { Ok(self.send_once(method, url, body).await?) }
        },
        is_transient,
      )
      .await
  }

  pub async fn put_batch(&self, body: &Value) -> Result<Value> {
    let url = format!("{}/_ah/api/buildbucket/v1/builds/batch", self.base_url);
    self.call("triggering try jobs", Method::PUT, &url, Some(body)).await
  }

  /// Every build tagged with `buildset`, following the search cursor.
  pub async fn search_builds(&self, buildset: &str) -> Result<BTreeMap<String, Build>> {
    let mut builds = BTreeMap::new();
    let mut cursor: Option<String> = None;
    loop {
      let mut url = Url::parse(&format!("{}/_ah/api/buildbucket/v1/search", self.base_url))?;
      url.query_pairs_mut().append_pair("tag", &format!("buildset:{buildset}"));
      if let Some(cursor) = &cursor {
        url.query_pairs_mut().append_pair("start_cursor", cursor);
      }
      let content = self.call("fetching try jobs", Method::GET, url.as_str(), None).await?;
      if let Some(page) = content.get("builds") {
        for build in serde_json::from_value::<Vec<Build>>(page.clone())? {
          builds.insert(build.id.clone(), build);
        }
      }
      match content.get("next_cursor").and_then(Value::as_str) {
        Some(next) => cursor = Some(next.to_string()),
        None => break,
      }
    }
    Ok(builds)
  }

  /// Builder name to the masters it runs on.
  pub async fn fetch_builders_map(&self, url: &str) -> Result<HashMap<String, Vec<String>>> {
    let map = self.call("fetching the builders map", Method::GET, url, None).await?;
    Ok(serde_json::from_value(map)?)
  }
}

fn codereview_host(cl: &Changelist) -> Result<String> {
  let server = cl.codereview_server()?;
  let url = Url::parse(&server).map_err(|_parse_error| ClError::invariant(format!("Invalid review server {server}")))?;
  url
    .host_str()
    .map(str::to_string)
    .ok_or_else(|| ClError::invariant(format!("Review server {server} has no host")).into())
}

/// Client for `host` authenticated with the review server's netrc token.
pub fn create_buildbucket_client(cl: &Changelist, host: &str) -> Result<BuildbucketClient> {
  let ctx = cl.context();
  let review_host = codereview_host(cl)?;
  let netrc = cl_core::creds::netrc::get_netrc_path(ctx.home());
  let token = cl_core::creds::netrc::lookup(&netrc, &review_host)?.map(|creds| creds.password);
  if token.is_none() {
    print_warning(&format!(
      "Some results might be missing because there are no credentials for {review_host} in ~/.netrc"
    ));
  }
  Ok(BuildbucketClient::new(host, token))
}

/// Buckets to schedule on: an explicit bucket or master, else the masters
/// the builders map names for each bot. `None` without bots.
pub fn get_bucket_map(
  cl: &Changelist,
  client: &BuildbucketClient,
  bots: &[String],
  bucket: Option<&str>,
  master: Option<&str>,
) -> Result<Option<BucketMap>> {
  if bots.is_empty() {
    return Ok(None);
  }
  let builders = || bots.iter().map(|b| (b.clone(), Vec::new())).collect::<BTreeMap<_, _>>();
  if let Some(bucket) = bucket {
    return Ok(Some(BTreeMap::from([(bucket.to_string(), builders())])));
  }
  if let Some(master) = master {
    return Ok(Some(BTreeMap::from([(prefix_master(master), builders())])));
  }
  let map = cl
    .context()
    .block_on(client.fetch_builders_map(BUILDERS_MAP_URL))?
    .map_err(|err| {
      ClError::invalid_input(format!(
        "Tryserver master cannot be found because: Failed to fetch builder-to-master map from {BUILDERS_MAP_URL}. Error: {err:#}\n\
         Please manually specify the tryserver master, e.g. \"-m tryserver.chromium.linux\"."
      ))
    })?;
  bucket_map_for_builders(bots, &map).map(Some)
}

/// Options of `git cl try` that shape the batch.
#[derive(Debug, Clone, Default)]
pub struct TryOptions {
  pub revision: Option<String>,
  pub clobber: bool,
  pub project: Option<String>,
  pub properties: Map<String, Value>,
}

/// Schedule `buckets` for `patchset` of the changelist's issue.
pub fn trigger_try_jobs(
  cl: &Changelist,
  client: &BuildbucketClient,
  buckets: BucketMap,
  opts: &TryOptions,
  patchset: u64,
) -> Result<TryJobRequest> {
  let issue = cl.require_issue()?;
  let mut properties = cl.tryjob_properties(Some(patchset))?;
  properties.insert("category".into(), json!(TRYJOB_CATEGORY));
  if opts.clobber {
    properties.insert("clobber".into(), json!(true));
  }
  if let Some(project) = &opts.project {
    properties.insert("project".into(), json!(project));
  }
  properties.extend(opts.properties.clone());

  let request = TryJobRequest {
    buckets,
    properties,
    owner_email: cl.issue_owner()?,
    revision: opts.revision.clone(),
    buildset: buildset(cl.backend_kind(), &codereview_host(cl)?, issue, patchset),
  };
  cl.context().block_on(client.put_batch(&request.batch_body()))??;
  info!("Scheduled try jobs for {}", request.buildset);
  println!("{}", request.summary());
  Ok(request)
}

/// Builds of `patchset` of the changelist's issue, by id.
pub fn fetch_try_jobs(cl: &Changelist, client: &BuildbucketClient, patchset: u64) -> Result<BTreeMap<String, Build>> {
  let issue = cl.require_issue()?;
  let buildset = buildset(cl.backend_kind(), &codereview_host(cl)?, issue, patchset);
  cl.context().block_on(client.search_builds(&buildset))?
}

/// Sections builds are reported in, each with its matching rule.
const SECTIONS: &[(&str, Option<&str>, Option<&str>, Option<&str>)] = &[
  ("Successes", Some("COMPLETED"), Some("SUCCESS"), None),
  ("Infra Failures", Some("COMPLETED"), Some("FAILURE"), Some("INFRA_FAILURE")),
  ("Failures", Some("COMPLETED"), Some("FAILURE"), Some("BUILD_FAILURE")),
  ("Canceled", Some("COMPLETED"), Some("CANCELED"), None),
  (
    "Wrong master/builder name",
    Some("COMPLETED"),
    Some("FAILURE"),
    Some("INVALID_BUILD_DEFINITION"),
  ),
  ("Other failures", Some("COMPLETED"), Some("FAILURE"), None),
  ("Other finished", Some("COMPLETED"), None, None),
  ("Started", Some("STARTED"), None, None),
  ("Scheduled", Some("SCHEDULED"), None, None),
  ("Other", None, None, None),
];

/// Builds split into report sections, in report order, skipping empty ones.
/// Every build lands in exactly one section.
pub fn group_builds(builds: &BTreeMap<String, Build>) -> Vec<(&'static str, Vec<&Build>)> {
  let mut remaining: Vec<&Build> = builds.values().collect();
  let mut sections = Vec::new();
  for (title, status, result, reason) in SECTIONS {
    let (matched, rest): (Vec<&Build>, Vec<&Build>) = remaining.into_iter().partition(|b| {
      status.is_none_or(|s| b.status == s)
        && result.is_none_or(|r| b.result.as_deref() == Some(r))
        && reason.is_none_or(|r| b.failure_reason.as_deref() == Some(r))
    });
    remaining = rest;
    if !matched.is_empty() {
      sections.push((*title, matched));
    }
  }
  sections
}

fn build_columns(title: &str, build: &Build, name: String) -> Vec<String> {
  let url = build.url.clone().unwrap_or_else(|| "None".to_string());
  match title {
    "Canceled" | "Wrong master/builder name" => vec![name],
    "Other failures" => vec![name, build.failure_reason.clone().unwrap_or_default(), url],
    "Other finished" => vec![name, build.result.clone().unwrap_or_default(), url],
    "Scheduled" | "Other" => vec![name, format!("id={}", build.id)],
    _ => vec![name, url],
  }
}

/// Try jobs grouped by outcome, with a total.
pub fn format_try_jobs(builds: &BTreeMap<String, Build>, print_master: bool) -> String {
  if builds.is_empty() {
    return "No try jobs scheduled".to_string();
  }
  let builder_names: HashMap<&str, String> = builds
    .values()
    .map(|b| (b.id.as_str(), b.builder_name().unwrap_or_else(|| "None".to_string())))
    .collect();
  let builder_width = builder_names.values().map(String::len).max().unwrap_or(0);
  let bucket_width = builds.values().map(|b| b.short_bucket().len()).max().unwrap_or(0);
  let name = |b: &Build| {
    let builder = &builder_names[b.id.as_str()];
    if print_master {
      format!("{:<bucket_width$} {builder:<builder_width$}", b.short_bucket())
    } else {
      format!("{builder:<builder_width$}")
    }
  };

  let mut lines = Vec::new();
  for (title, mut section) in group_builds(builds) {
    section.sort_by(|a, b| {
      (&a.status, &a.result, name(a), &a.url).cmp(&(&b.status, &b.result, name(b), &b.url))
    });
    lines.push(format!("{}:", format_build_section(title)));
    for build in section {
      lines.push(format!("  {}", build_columns(title, build, name(build)).join("\t")));
    }
  }
  lines.push(format!("Total: {} try jobs", builds.len()));
  lines.join("\n")
}

/// The subset of build fields written by `try-results --json`.
pub fn try_results_json(builds: &BTreeMap<String, Build>) -> Value {
  Value::Array(
    builds
      .values()
      .map(|b| {
        json!({
          "buildbucket_id": b.id,
          "status": b.status,
          "result": b.result,
          "bucket": b.bucket,
          "builder_name": b.builder_name(),
          "failure_reason": b.failure_reason,
          "url": b.url,
        })
      })
      .collect(),
  )
}
