//! # Status Aggregator
//!
//! Fetches the review status of many changelists. The first one is fetched
//! on the calling thread so credential problems surface once and in order;
//! the rest go to a bounded pool of worker threads and arrive in completion
//! order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use cl_core::ClStatus;
use tracing::{debug, warn};

use crate::changelist::Changelist;
use crate::consts::STATUS_POLL_TIMEOUT;

/// Status of `items[i]` for every index, computed by `fetch` and handed to
/// `on_result` on the calling thread as soon as it arrives.
///
/// Exactly one result per item is reported, the first item first. Fetch
/// errors become [`ClStatus::Error`]. When no result arrives for `timeout`
/// the remaining items are reported as errors and no further fetches start.
pub fn fetch_statuses<T, F, R>(items: &[T], max_jobs: usize, timeout: Duration, fetch: F, mut on_result: R)
where
  T: Sync,
  F: Fn(&T) -> Result<Option<ClStatus>> + Sync,
  R: FnMut(usize, Option<ClStatus>),
{
  let guarded = |index: usize| match fetch(&items[index]) {
    Ok(status) => status,
    Err(err) => {
      warn!("Failed to fetch status for item {index}: {err:#}");
      Some(ClStatus::Error)
    }
  };

  if items.is_empty() {
    return;
  }
  on_result(0, guarded(0));
  let remaining = items.len() - 1;
  if remaining == 0 {
    return;
  }

  let workers = max_jobs.clamp(1, remaining);
  debug!("Fetching {remaining} statuses with {workers} workers");
  let next = AtomicUsize::new(1);
  let stop = AtomicBool::new(false);
  let mut received = vec![false; items.len()];
  received[0] = true;
  let mut reported = 1;

  thread::scope(|scope| {
    let (tx, rx) = mpsc::channel();
    for _ in 0..workers {
      let tx = tx.clone();
      let (next, stop, guarded) = (&next, &stop, &guarded);
      scope.spawn(move || {
        while !stop.load(Ordering::Relaxed) {
          let index = next.fetch_add(1, Ordering::Relaxed);
          if index >= items.len() {
            break;
          }
          if tx.send((index, guarded(index))).is_err() {
            break;
          }
        }
      });
    }
    drop(tx);

    while reported < items.len() {
      match rx.recv_timeout(timeout) {
        Ok((index, status)) => {
          received[index] = true;
          reported += 1;
          on_result(index, status);
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
          warn!("Timed out waiting for status results");
          stop.store(true, Ordering::Relaxed);
          break;
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => break,
      }
    }
  });

  for (index, done) in received.iter().enumerate() {
    if !done {
      on_result(index, Some(ClStatus::Error));
    }
  }
}

/// Review status of every changelist, reported through `on_result` in
/// arrival order.
///
/// With `fine_grained` unset no request is made: a changelist with an issue
/// is reported as waiting, one without as an error.
pub fn get_cl_statuses<R>(changes: &[Changelist], fine_grained: bool, max_jobs: usize, mut on_result: R)
where
  R: FnMut(usize, Option<ClStatus>),
{
  if !fine_grained {
    for (index, cl) in changes.iter().enumerate() {
      let has_url = cl.issue_url().ok().flatten().is_some();
      on_result(index, Some(if has_url { ClStatus::Waiting } else { ClStatus::Error }));
    }
    return;
  }
  fetch_statuses(changes, max_jobs, STATUS_POLL_TIMEOUT, Changelist::status, on_result);
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;
  use std::sync::Arc;
  use std::time::Instant;

  use anyhow::anyhow;
  use cl_core::{BackendKind, GitCli, Vcs};
  use cl_test_utils::GitRepoTestGuard;

  use super::*;
  use crate::context::ClContext;

  fn collect<T: Sync>(
    items: &[T],
    max_jobs: usize,
    timeout: Duration,
    fetch: impl Fn(&T) -> Result<Option<ClStatus>> + Sync,
  ) -> Vec<(usize, Option<ClStatus>)> {
    let mut results = Vec::new();
    fetch_statuses(items, max_jobs, timeout, fetch, |index, status| results.push((index, status)));
    results
  }

  #[test]
  fn test_every_item_reported_once_with_errors_mapped() {
    let items = [1, 2, 3, 4, 5];
    let results = collect(&items, 2, Duration::from_secs(5), |item| {
      if *item == 4 {
        Err(anyhow!("server exploded"))
      } else {
        Ok(Some(ClStatus::Waiting))
      }
    });

    assert_eq!(results.len(), 5);
    assert_eq!(results[0], (0, Some(ClStatus::Waiting)));
    let indices: HashSet<usize> = results.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices.len(), 5);
    let failed: Vec<usize> = results
      .iter()
      .filter(|(_, s)| *s == Some(ClStatus::Error))
      .map(|(i, _)| *i)
      .collect();
    assert_eq!(failed, vec![3]);
  }

  #[test]
  fn test_fast_results_arrive_before_slow_ones_finish() {
    let items = [0_u64, 0, 400];
    let started = Instant::now();
    let mut arrivals = Vec::new();
    fetch_statuses(
      &items,
      2,
      Duration::from_secs(5),
      |delay| {
        thread::sleep(Duration::from_millis(*delay));
        Ok(Some(ClStatus::Waiting))
      },
      |index, _status| arrivals.push((index, started.elapsed())),
    );
    let order: Vec<usize> = arrivals.iter().map(|(index, _)| *index).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert!(arrivals[1].1 < Duration::from_millis(400));
  }

  #[test]
  fn test_single_and_empty_inputs() {
    let none: [u8; 0] = [];
    assert!(collect(&none, 4, Duration::from_secs(1), |_| Ok(None)).is_empty());
    let one = collect(&[()], 4, Duration::from_secs(1), |_| Ok(Some(ClStatus::Lgtm)));
    assert_eq!(one, vec![(0, Some(ClStatus::Lgtm))]);
  }

  #[test]
  fn test_slow_items_are_reported_as_errors() {
    let items = [0_u64, 0, 300, 300];
    let results = collect(&items, 1, Duration::from_millis(50), |delay| {
      thread::sleep(Duration::from_millis(*delay));
      Ok(Some(ClStatus::Waiting))
    });
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].1, Some(ClStatus::Waiting));
    assert!(results.iter().any(|(_, s)| *s == Some(ClStatus::Error)));
  }

  #[test]
  fn test_fast_mode_makes_no_requests() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let vcs = GitCli::new(guard.path());
    vcs.run(&["branch", "feature"])?;
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    ctx.store().set("feature", "gerritissue", 42_i64)?;
    ctx.store().set("feature", "gerritserver", "https://review.example.com")?;

    let changes = vec![
      Changelist::new(Arc::clone(&ctx), Some("refs/heads/feature".into()), None, None)?,
      Changelist::new(ctx, Some("refs/heads/main".into()), None, Some(BackendKind::Gerrit))?,
    ];
    let mut results = Vec::new();
    get_cl_statuses(&changes, false, 4, |index, status| results.push((index, status)));
    assert_eq!(results, vec![(0, Some(ClStatus::Waiting)), (1, Some(ClStatus::Error))]);
    Ok(())
  }
}
