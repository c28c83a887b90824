//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, Response};

/// Canonical request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  method: String,
  url: Url,
}

impl CacheKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_ascii_uppercase(),
      url,
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  /// Key for a GET of the given URL.
  pub fn get(url: &Url) -> Self {
    Self::new("GET", url)
  }

  /// Human-readable identity, e.g. `GET https://example.com/app.html`.
  pub fn identity(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.identity().as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn url(&self) -> &Url {
    &self.url
  }
}

/// A stored response snapshot. Written whole, never patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Hit in the active generation
  Cache,
  /// The default document served in place of a missing resource
  DefaultDocument,
  /// Synthesized because neither network nor cache could answer
  Offline,
}

impl CacheSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::DefaultDocument => "default-document",
      Self::Offline => "offline",
    }
  }
}
