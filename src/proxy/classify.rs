use crate::config::ApiConfig;
use crate::net::Request;

/// Retrieval category of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Network raced against a deadline, never cached
  Api,
  /// Top-level navigation, cache first with the default document as fallback
  Document,
  /// Everything else, cache first with write-through
  Static,
}

/// Maps requests onto a [`RequestClass`]. Pure and total.
#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefix: String,
  api_host: String,
}

impl Classifier {
  pub fn new(api_prefix: impl Into<String>, api_host: impl Into<String>) -> Self {
    Self {
      api_prefix: api_prefix.into(),
      api_host: api_host.into().to_ascii_lowercase(),
    }
  }

  pub fn from_config(api: &ApiConfig) -> Self {
    Self::new(api.prefix.clone(), api.host.clone())
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    let on_api_path = !self.api_prefix.is_empty() && request.url.path().starts_with(&self.api_prefix);
    let on_api_host = !self.api_host.is_empty()
      && request
        .url
        .host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(&self.api_host));

    if on_api_path || on_api_host {
      RequestClass::Api
    } else if request.destination.is_document() {
      RequestClass::Document
    } else {
      RequestClass::Static
    }
  }
}
