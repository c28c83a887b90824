//! Per-class retrieval strategies.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::classify::{Classifier, RequestClass};
use crate::cache::{CacheKey, CacheSource, CacheStorage, CacheStore, LifecycleManager};
use crate::net::{Fetcher, Request, Response};

/// Body of the plain-text response used when nothing else can answer.
pub const OFFLINE_TEXT: &str = "Offline — cached resource not available";

/// An intercepted response together with how it was obtained.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: CacheSource,
  pub class: RequestClass,
}

/// Settings for [`FetchEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
  pub classifier: Classifier,
  /// Deadline for API requests
  pub api_timeout: Duration,
  pub offline_message: String,
  /// Absolute URL of the page served for failed navigations
  pub default_document: Url,
}

/// Executes the retrieval strategy for each intercepted request.
///
/// Never fails: every request yields a response, synthesized if necessary.
pub struct FetchEngine<S: CacheStorage, F: Fetcher> {
  lifecycle: Arc<LifecycleManager<S, F>>,
  fetcher: Arc<F>,
  options: EngineOptions,
}

impl<S: CacheStorage, F: Fetcher> FetchEngine<S, F> {
  pub fn new(lifecycle: Arc<LifecycleManager<S, F>>, fetcher: Arc<F>, options: EngineOptions) -> Self {
    Self {
      lifecycle,
      fetcher,
      options,
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    self.options.classifier.classify(request)
  }

  /// Answer one intercepted request.
  pub async fn handle(&self, request: Request) -> Served {
    let class = self.classify(&request);
    debug!(method = %request.method, url = %request.url, ?class, "intercepted request");

    let (response, source) = match class {
      RequestClass::Api => self.race_network(request).await,
      RequestClass::Document | RequestClass::Static => self.cache_first(request).await,
    };

    Served {
      response,
      source,
      class,
    }
  }

  /// Race the network against the API deadline.
  ///
  /// The fetch runs as its own task. If the deadline wins, the task is left to
  /// finish on its own and its result is discarded. A fetch that completes in
  /// the same tick as the deadline still wins.
  async fn race_network(&self, request: Request) -> (Response, CacheSource) {
    let fetcher = Arc::clone(&self.fetcher);
    let url = request.url.clone();
    let mut network = tokio::spawn(async move { fetcher.fetch(&request).await });

    let raced = tokio::select! {
      biased;
      joined = &mut network => Some(joined),
      _ = tokio::time::sleep(self.options.api_timeout) => None,
    };

    let joined = match raced {
      Some(joined) => joined,
      None => {
        // Let a fetch woken by the same timer tick finish before giving up
        tokio::task::yield_now().await;
        if !network.is_finished() {
          debug!(%url, timeout = ?self.options.api_timeout, "api request timed out, answering offline");
          return (self.offline_json(), CacheSource::Offline);
        }
        network.await
      }
    };

    match joined {
      Ok(Ok(response)) => (response, CacheSource::Network),
      Ok(Err(e)) => {
        debug!(%url, error = %e, "api request failed, answering offline");
        (self.offline_json(), CacheSource::Offline)
      }
      Err(e) => {
        warn!(%url, error = %e, "api fetch task aborted");
        (self.offline_json(), CacheSource::Offline)
      }
    }
  }

  /// Cache-first with write-through.
  ///
  /// 1. Check the active generation - on hit, return without touching the network
  /// 2. On miss, fetch from network and store 2xx GET responses
  /// 3. On network failure, fall back to the default document, then to a 503
  async fn cache_first(&self, request: Request) -> (Response, CacheSource) {
    let key = CacheKey::for_request(&request);
    // One snapshot for the whole request so it never mixes generations
    let store = self.lifecycle.active_store();

    if let Some(store) = &store {
      match store.lookup(&key) {
        Ok(Some(entry)) => {
          debug!(key = %key.identity(), generation = %store.label(), "cache hit");
          return (entry.response, CacheSource::Cache);
        }
        Ok(None) => {}
        Err(e) => warn!(key = %key.identity(), error = %e, "cache lookup failed"),
      }
    }

    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if request.is_get() && response.is_ok() {
          if let Some(store) = &store {
            // Best effort: a failed write never fails the request
            if let Err(e) = store.put(&key, &response) {
              warn!(key = %key.identity(), error = %e, "write-through failed");
            }
          }
        }
        (response, CacheSource::Network)
      }
      Err(e) => {
        debug!(key = %key.identity(), error = %e, "network unavailable, using fallback");
        self.offline_fallback(store.as_ref())
      }
    }
  }

  fn offline_fallback(&self, store: Option<&CacheStore<S>>) -> (Response, CacheSource) {
    let default_key = CacheKey::get(&self.options.default_document);

    if let Some(store) = store {
      match store.lookup(&default_key) {
        Ok(Some(entry)) => return (entry.response, CacheSource::DefaultDocument),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "default document lookup failed"),
      }
    }

    (
      Response::with_content_type(503, "text/plain; charset=utf-8", OFFLINE_TEXT),
      CacheSource::Offline,
    )
  }

  fn offline_json(&self) -> Response {
    let body = json!({
      "error": "offline",
      "message": self.options.offline_message,
      "offline": true,
    });
    Response::with_content_type(503, "application/json", body.to_string())
  }
}
