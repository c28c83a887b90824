use color_eyre::Result;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{CacheKey, ResourceEntry};
use crate::net::Response;

/// Handle on one cache generation.
///
/// The label is fixed at construction, so a holder keeps reading and writing
/// the same generation even if another one becomes active meanwhile.
#[derive(Debug)]
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  label: Arc<str>,
}

impl<S: CacheStorage> CacheStore<S> {
  pub fn new(storage: Arc<S>, label: impl Into<Arc<str>>) -> Self {
    Self {
      storage,
      label: label.into(),
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  /// Look up an entry. A miss is `Ok(None)`.
  pub fn lookup(&self, key: &CacheKey) -> Result<Option<ResourceEntry>> {
    self.storage.get_entry(&self.label, key)
  }

  pub fn put(&self, key: &CacheKey, response: &Response) -> Result<()> {
    self.storage.put_entry(&self.label, key, response)
  }

  /// Store every entry or none of them.
  pub fn put_all(&self, entries: &[(CacheKey, Response)]) -> Result<()> {
    self.storage.put_entries(&self.label, entries)
  }

  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.keys(&self.label)
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      label: Arc::clone(&self.label),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use url::Url;

  #[test]
  fn test_store_scoped_to_its_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.open_generation("v1").unwrap();
    storage.open_generation("v2").unwrap();
    let v1 = CacheStore::new(Arc::clone(&storage), "v1");
    let v2 = CacheStore::new(Arc::clone(&storage), "v2");

    let key = CacheKey::get(&Url::parse("https://example.com/logo.png").unwrap());
    let resp = Response::with_content_type(200, "image/png", vec![1, 2, 3]);
    v1.put(&key, &resp).unwrap();

    assert_eq!(v1.lookup(&key).unwrap().unwrap().response, resp);
    assert!(v2.lookup(&key).unwrap().is_none());
    assert_eq!(v1.keys().unwrap(), vec!["GET https://example.com/logo.png"]);
    assert_eq!(v2.label(), "v2");
  }
}
