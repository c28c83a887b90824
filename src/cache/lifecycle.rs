//! Cache generation lifecycle: seeding new generations and retiring old ones.

use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::CacheStorage;
use super::store::CacheStore;
use super::traits::CacheKey;
use crate::net::{Fetcher, Request};

#[derive(Debug, Error)]
pub enum LifecycleError {
  /// A seed could not be retrieved; the generation was not installed.
  #[error("seed {url} could not be fetched: {reason}")]
  SeedFetch { url: String, reason: String },
  #[error("generation {0} is not installed")]
  UnknownGeneration(String),
  #[error("cache storage failure: {0}")]
  Storage(color_eyre::Report),
}

impl From<color_eyre::Report> for LifecycleError {
  fn from(report: color_eyre::Report) -> Self {
    Self::Storage(report)
  }
}

/// Creates, activates and prunes cache generations.
///
/// The active label is published through a watch channel so every reader
/// takes a snapshot of exactly one generation.
pub struct LifecycleManager<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  active: watch::Sender<Option<Arc<str>>>,
}

impl<S: CacheStorage, F: Fetcher> LifecycleManager<S, F> {
  /// Create a manager, resuming whatever generation was active last run.
  pub fn new(storage: Arc<S>, fetcher: Arc<F>) -> color_eyre::Result<Self> {
    let persisted = storage.active_generation()?;
    if let Some(label) = &persisted {
      info!(generation = %label, "resuming active cache generation");
    }
    let (active, _) = watch::channel(persisted.map(Arc::from));

    Ok(Self {
      storage,
      fetcher,
      active,
    })
  }

  /// Open or create `version` and seed it with every URL in `seeds`.
  ///
  /// All seeds are fetched before anything is written. If any of them fails
  /// (transport error or non-2xx status) nothing is stored, and a generation
  /// created by this call is removed again.
  pub async fn initialize(
    &self,
    version: &str,
    seeds: &[Url],
  ) -> Result<CacheStore<S>, LifecycleError> {
    let created = self.storage.open_generation(version)?;
    info!(generation = %version, seeds = seeds.len(), created, "seeding cache generation");

    let fetches = seeds.iter().map(|url| {
      let fetcher = Arc::clone(&self.fetcher);
      async move {
        let outcome = fetcher.fetch(&Request::get(url.clone())).await;
        (url, outcome)
      }
    });

    let mut entries = Vec::with_capacity(seeds.len());
    let mut failure = None;
    for (url, outcome) in join_all(fetches).await {
      match outcome {
        Ok(response) if response.is_ok() => entries.push((CacheKey::get(url), response)),
        Ok(response) => {
          failure = Some(LifecycleError::SeedFetch {
            url: url.to_string(),
            reason: format!("status {}", response.status),
          });
          break;
        }
        Err(e) => {
          failure = Some(LifecycleError::SeedFetch {
            url: url.to_string(),
            reason: e.to_string(),
          });
          break;
        }
      }
    }

    let store = CacheStore::new(Arc::clone(&self.storage), version);
    let result = match failure {
      Some(err) => Err(err),
      None => store.put_all(&entries).map_err(LifecycleError::from),
    };

    if let Err(err) = result {
      warn!(generation = %version, error = %err, "cache seeding failed");
      if created {
        if let Err(e) = self.storage.delete_generation(version) {
          warn!(generation = %version, error = %e, "failed to discard partial generation");
        }
      }
      return Err(err);
    }

    info!(generation = %version, entries = entries.len(), "cache generation ready");
    Ok(store)
  }

  /// Make `version` the sole serving generation and delete all others.
  ///
  /// Returns the labels that were removed. Deletion is irreversible.
  pub fn activate(&self, version: &str) -> Result<Vec<String>, LifecycleError> {
    let generations = self.storage.generations()?;
    if !generations.iter().any(|g| g.label == version) {
      return Err(LifecycleError::UnknownGeneration(version.to_string()));
    }

    // Publish first so new requests never pick a generation about to vanish
    self.storage.set_active(version)?;
    self.active.send_replace(Some(Arc::from(version)));

    let mut removed = Vec::new();
    for generation in generations.into_iter().filter(|g| g.label != version) {
      info!(generation = %generation.label, entries = generation.entries, "removing old cache");
      self.storage.delete_generation(&generation.label)?;
      removed.push(generation.label);
    }

    info!(generation = %version, "cache generation activated");
    Ok(removed)
  }

  /// Label of the serving generation.
  pub fn active_label(&self) -> Option<String> {
    self.active.borrow().as_deref().map(String::from)
  }

  /// Snapshot handle on the serving generation.
  pub fn active_store(&self) -> Option<CacheStore<S>> {
    let label = self.active.borrow().clone();
    debug!(generation = ?label.as_deref(), "active generation snapshot");
    label.map(|label| CacheStore::new(Arc::clone(&self.storage), label))
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::testing::{Behavior, MockFetcher};

  const ORIGIN: &str = "https://app.example.com";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn manager(fetcher: MockFetcher) -> LifecycleManager<SqliteStorage, MockFetcher> {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    LifecycleManager::new(storage, Arc::new(fetcher)).unwrap()
  }

  #[tokio::test]
  async fn test_seed_success_installs_all_keys() {
    let fetcher = MockFetcher::new()
      .on(url("/").as_str(), MockFetcher::ok("root"))
      .on(url("/app.html").as_str(), MockFetcher::ok("app"));
    let lifecycle = manager(fetcher);

    let store = lifecycle
      .initialize("v1", &[url("/"), url("/app.html")])
      .await
      .unwrap();
    lifecycle.activate("v1").unwrap();

    let active = lifecycle.active_store().unwrap();
    assert_eq!(active.label(), "v1");
    assert_eq!(store.keys().unwrap().len(), 2);
    let entry = active.lookup(&CacheKey::get(&url("/app.html"))).unwrap().unwrap();
    assert_eq!(entry.response.body, b"app");
    assert!(active.lookup(&CacheKey::get(&url("/"))).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_seed_failure_installs_nothing() {
    let fetcher = MockFetcher::new()
      .on(url("/").as_str(), MockFetcher::ok("root"))
      .on(url("/missing.html").as_str(), Behavior::Fail);
    let lifecycle = manager(fetcher);

    let err = lifecycle
      .initialize("v1", &[url("/"), url("/missing.html")])
      .await
      .unwrap_err();

    assert!(matches!(err, LifecycleError::SeedFetch { ref url, .. } if url.ends_with("/missing.html")));
    assert!(lifecycle.storage().generations().unwrap().is_empty());
    assert!(lifecycle.active_store().is_none());
    assert!(matches!(
      lifecycle.activate("v1"),
      Err(LifecycleError::UnknownGeneration(_))
    ));
  }

  #[tokio::test]
  async fn test_seed_error_status_counts_as_failure() {
    let fetcher = MockFetcher::new().on(
      url("/").as_str(),
      Behavior::Respond(crate::net::Response::new(404, vec![], b"nope".to_vec())),
    );
    let lifecycle = manager(fetcher);

    let err = lifecycle.initialize("v1", &[url("/")]).await.unwrap_err();
    assert!(matches!(err, LifecycleError::SeedFetch { ref reason, .. } if reason.contains("404")));
  }

  #[tokio::test]
  async fn test_failed_reseed_keeps_existing_generation() {
    let fetcher = MockFetcher::new().on(url("/").as_str(), MockFetcher::ok("root"));
    let lifecycle = manager(fetcher);
    lifecycle.initialize("v1", &[url("/")]).await.unwrap();
    lifecycle.activate("v1").unwrap();

    let result = lifecycle
      .initialize("v1", &[url("/"), url("/gone.html")])
      .await;

    assert!(result.is_err());
    let active = lifecycle.active_store().unwrap();
    assert!(active.lookup(&CacheKey::get(&url("/"))).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_activate_v2_prunes_v1_only() {
    let fetcher = MockFetcher::new()
      .on(url("/").as_str(), MockFetcher::ok("root"))
      .on(url("/app.html").as_str(), MockFetcher::ok("app"));
    let lifecycle = manager(fetcher);

    let v1 = lifecycle.initialize("v1", &[url("/")]).await.unwrap();
    lifecycle.activate("v1").unwrap();
    v1.put(
      &CacheKey::get(&url("/extra.js")),
      &crate::net::Response::new(200, vec![], b"js".to_vec()),
    )
    .unwrap();

    let v2 = lifecycle
      .initialize("v2", &[url("/"), url("/app.html")])
      .await
      .unwrap();
    let v2_keys_before = v2.keys().unwrap();

    let removed = lifecycle.activate("v2").unwrap();

    assert_eq!(removed, vec!["v1".to_string()]);
    assert!(v1.keys().unwrap().is_empty());
    assert_eq!(v2.keys().unwrap(), v2_keys_before);
    assert_eq!(lifecycle.active_label().as_deref(), Some("v2"));
    let labels: Vec<_> = lifecycle
      .storage()
      .generations()
      .unwrap()
      .into_iter()
      .map(|g| g.label)
      .collect();
    assert_eq!(labels, vec!["v2".to_string()]);
  }

  #[tokio::test]
  async fn test_stale_handle_cannot_write_after_pruning() {
    let fetcher = MockFetcher::new().on(url("/").as_str(), MockFetcher::ok("root"));
    let lifecycle = manager(fetcher);
    lifecycle.initialize("v1", &[url("/")]).await.unwrap();
    lifecycle.activate("v1").unwrap();
    let old = lifecycle.active_store().unwrap();

    lifecycle.initialize("v2", &[url("/")]).await.unwrap();
    lifecycle.activate("v2").unwrap();

    let resp = crate::net::Response::new(200, vec![], b"late".to_vec());
    assert!(old.put(&CacheKey::get(&url("/late.js")), &resp).is_err());
    assert!(lifecycle.storage().keys("v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_new_manager_resumes_persisted_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(MockFetcher::new().on(url("/").as_str(), MockFetcher::ok("root")));

    let first = LifecycleManager::new(Arc::clone(&storage), Arc::clone(&fetcher)).unwrap();
    first.initialize("v1", &[url("/")]).await.unwrap();
    first.activate("v1").unwrap();

    let second = LifecycleManager::new(storage, fetcher).unwrap();
    assert_eq!(second.active_label().as_deref(), Some("v1"));
  }
}
