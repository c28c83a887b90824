//! Transport-neutral request and response primitives.

use serde::{Deserialize, Serialize};
use url::Url;

/// Destination tag carried by an intercepted request.
///
/// Mirrors the `Sec-Fetch-Dest` vocabulary; only `document` has special meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
  /// Top-level navigable resource
  Document,
  /// Anything else (scripts, images, fetches, ...), with the raw tag kept
  Other(String),
}

impl Destination {
  pub fn parse(tag: &str) -> Self {
    match tag.trim().to_ascii_lowercase().as_str() {
      "document" => Self::Document,
      "" => Self::Other("other".to_string()),
      other => Self::Other(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Document => "document",
      Self::Other(tag) => tag,
    }
  }

  pub fn is_document(&self) -> bool {
    matches!(self, Self::Document)
  }
}

impl Default for Destination {
  fn default() -> Self {
    Self::Other("other".to_string())
  }
}

/// An intercepted outgoing request. Lives only for one interception.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Request {
  /// Create a GET request with the default `other` destination.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::default(),
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
    self.headers = headers;
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = body;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

/// A response snapshot: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  /// Build a response with a single `Content-Type` header.
  pub fn with_content_type(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self::new(
      status,
      vec![("Content-Type".to_string(), content_type.to_string())],
      body.into(),
    )
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
