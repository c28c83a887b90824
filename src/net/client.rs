use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use thiserror::Error;
use tracing::trace;

use super::types::{Request, Response};

/// Failure to obtain any response from the network.
///
/// An HTTP error status is still a response; only transport-level problems land here.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  /// Network unreachable, connection refused, DNS failure, broken body...
  #[error("network unavailable: {0}")]
  Unavailable(String),
  /// The request could not be expressed on the wire (bad method or header)
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

/// Seam between the proxy core and the transport.
pub trait Fetcher: Send + Sync + 'static {
  /// Perform the request and resolve with whatever the origin answered.
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send;
}

/// Network fetcher backed by reqwest.
#[derive(Clone)]
pub struct ReqwestFetcher {
  client: reqwest::Client,
}

impl ReqwestFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .user_agent(concat!("harbor/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for ReqwestFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FetchError::InvalidRequest(format!("method {}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| FetchError::InvalidRequest(format!("header {}: {}", name, e)))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| FetchError::InvalidRequest(format!("header value: {}", e)))?;
      builder = builder.header(name, value);
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    trace!(method = %request.method, url = %request.url, "network fetch");

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::Unavailable(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Unavailable(format!("reading body: {}", e)))?;

    Ok(Response::new(status, headers, body.to_vec()))
  }
}
