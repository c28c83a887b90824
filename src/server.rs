//! HTTP front end: turns real HTTP traffic into interceptions.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use color_eyre::{eyre::eyre, Result};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::cache::SqliteStorage;
use crate::net::{Destination, Fetcher, ReqwestFetcher, Request};
use crate::proxy::Served;
use crate::worker::{ControlMessage, ProxyWorker};

pub type AppWorker = ProxyWorker<SqliteStorage, ReqwestFetcher>;

/// Headers that describe one hop or one encoding, not the resource.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "host",
  "content-length",
  "content-encoding",
  "accept-encoding",
];

fn is_hop_by_hop(name: &str) -> bool {
  HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

pub struct AppState<F: Fetcher = ReqwestFetcher> {
  pub worker: Arc<ProxyWorker<SqliteStorage, F>>,
  pub origin: Url,
}

impl<F: Fetcher> Clone for AppState<F> {
  fn clone(&self) -> Self {
    Self {
      worker: Arc::clone(&self.worker),
      origin: self.origin.clone(),
    }
  }
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
  tag: String,
}

#[derive(Debug, Deserialize)]
struct InteractionRequest {
  #[serde(default)]
  action: Option<String>,
}

/// Create the router: control endpoints under `/__harbor`, everything else intercepted.
pub fn create_router<F: Fetcher>(state: AppState<F>) -> Router {
  Router::new()
    .route("/__harbor/status", get(status::<F>))
    .route("/__harbor/message", post(message::<F>))
    .route("/__harbor/sync", post(sync::<F>))
    .route("/__harbor/events", get(events::<F>))
    .route("/__harbor/push", post(push::<F>))
    .route("/__harbor/notification", post(notification::<F>))
    .fallback(intercept::<F>)
    .with_state(state)
    .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, listen: SocketAddr) -> Result<()> {
  let app = create_router(state);

  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;
  info!("Listening on http://{}", listen);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for ctrl-c");
    return;
  }
  info!("shutting down");
}

/// Convert an incoming HTTP request into an interception.
///
/// Absolute-form targets (forward proxy style) are kept, origin-form targets
/// are resolved against `origin`.
pub fn build_request(
  origin: &Url,
  method: &Method,
  uri: &Uri,
  headers: &HeaderMap,
  body: Vec<u8>,
) -> Result<Request> {
  let url = if uri.scheme().is_some() && uri.authority().is_some() {
    Url::parse(&uri.to_string())
  } else {
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    origin.join(target)
  }
  .map_err(|e| eyre!("Invalid request target {}: {}", uri, e))?;

  let destination = headers
    .get("sec-fetch-dest")
    .and_then(|v| v.to_str().ok())
    .map(Destination::parse)
    .unwrap_or_default();

  let forwarded = headers
    .iter()
    .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.to_string(), v.to_string()))
    })
    .collect();

  Ok(
    Request::get(url)
      .with_method(method.as_str())
      .with_destination(destination)
      .with_headers(forwarded)
      .with_body(body),
  )
}

/// Convert an intercepted response back into HTTP, tagging where it came from.
pub fn into_http_response(served: Served) -> HttpResponse {
  let status = StatusCode::from_u16(served.response.status).unwrap_or(StatusCode::BAD_GATEWAY);

  let mut builder = axum::http::Response::builder().status(status);
  for (name, value) in &served.response.headers {
    if !is_hop_by_hop(name) {
      builder = builder.header(name.as_str(), value.as_str());
    }
  }

  builder
    .header("x-harbor-source", served.source.as_str())
    .body(Body::from(served.response.body))
    .unwrap_or_else(|e| {
      warn!(error = %e, "unrepresentable response");
      (StatusCode::BAD_GATEWAY, "unrepresentable upstream response").into_response()
    })
}

async fn intercept<F: Fetcher>(
  State(state): State<AppState<F>>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> HttpResponse {
  let request = match build_request(&state.origin, &method, &uri, &headers, body.to_vec()) {
    Ok(request) => request,
    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  };

  into_http_response(state.worker.intercept(request).await)
}

async fn status<F: Fetcher>(State(state): State<AppState<F>>) -> HttpResponse {
  Json(state.worker.status()).into_response()
}

async fn message<F: Fetcher>(
  State(state): State<AppState<F>>,
  Json(message): Json<ControlMessage>,
) -> HttpResponse {
  match state.worker.on_message(&message) {
    Ok(activated) => Json(serde_json::json!({ "activated": activated })).into_response(),
    Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
  }
}

async fn sync<F: Fetcher>(
  State(state): State<AppState<F>>,
  Json(request): Json<SyncRequest>,
) -> HttpResponse {
  Json(state.worker.on_sync_trigger(&request.tag).await).into_response()
}

async fn events<F: Fetcher>(
  State(state): State<AppState<F>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
  let stream = BroadcastStream::new(state.worker.subscribe()).filter_map(|message| async move {
    // Lagged observers just miss messages
    let message = message.ok()?;
    Event::default().json_data(&message).ok().map(Ok)
  });

  Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn push<F: Fetcher>(State(state): State<AppState<F>>, body: String) -> HttpResponse {
  let text = Some(body.trim()).filter(|t| !t.is_empty());
  Json(state.worker.on_push(text)).into_response()
}

async fn notification<F: Fetcher>(
  State(state): State<AppState<F>>,
  Json(request): Json<InteractionRequest>,
) -> HttpResponse {
  Json(state.worker.on_notification_interaction(request.action.as_deref())).into_response()
}
