//! Scripted fetcher for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::client::{FetchError, Fetcher};
use super::types::{Request, Response};

#[derive(Clone)]
pub enum Behavior {
  Respond(Response),
  /// Respond after a delay (tokio time, so it works with paused clocks)
  Delay(Duration, Response),
  Fail,
  /// Never resolve
  Hang,
}

/// Fetcher answering from a per-URL script. Unscripted URLs fail.
#[derive(Default)]
pub struct MockFetcher {
  script: Mutex<HashMap<String, Behavior>>,
  calls: Mutex<Vec<String>>,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on(self, url: &str, behavior: Behavior) -> Self {
    self.set(url, behavior);
    self
  }

  pub fn set(&self, url: &str, behavior: Behavior) {
    self
      .script
      .lock()
      .unwrap()
      .insert(url.to_string(), behavior);
  }

  pub fn ok(body: &str) -> Behavior {
    Behavior::Respond(Response::with_content_type(200, "text/plain", body))
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, url: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
  }
}

impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());
    let behavior = self.script.lock().unwrap().get(&url).cloned();

    match behavior {
      Some(Behavior::Respond(resp)) => Ok(resp),
      Some(Behavior::Delay(delay, resp)) => {
        tokio::time::sleep(delay).await;
        Ok(resp)
      }
      Some(Behavior::Hang) => std::future::pending().await,
      Some(Behavior::Fail) | None => Err(FetchError::Unavailable(format!("no route to {}", url))),
    }
  }
}
