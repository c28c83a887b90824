//! Entry points the hosting platform calls into.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStorage, GenerationInfo, LifecycleError, LifecycleManager};
use crate::config::Config;
use crate::net::{Fetcher, Request, Response};
use crate::notify::{Effect, LogSink, NotificationDispatcher, NotificationPayload, NotificationSink};
use crate::proxy::{Classifier, EngineOptions, FetchEngine, Served};
use crate::sync::{ClientMessage, SyncCoordinator, SyncOutcome, SyncTask};

/// Where the worker is in its install/activate cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "generation", rename_all = "snake_case")]
pub enum Phase {
  Parsed,
  Installing,
  /// Seeded and waiting to take over
  Installed(String),
  Activating,
  Activated(String),
}

/// Control messages sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  #[serde(other)]
  Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
  pub version: String,
  pub phase: Phase,
  pub active_generation: Option<String>,
  pub entries: usize,
}

/// The proxy core: lifecycle, interception, sync and notifications.
pub struct ProxyWorker<S: CacheStorage, F: Fetcher, N: NotificationSink = LogSink> {
  version: String,
  seeds: Vec<Url>,
  skip_waiting: bool,
  phase: watch::Sender<Phase>,
  lifecycle: Arc<LifecycleManager<S, F>>,
  engine: FetchEngine<S, F>,
  sync: SyncCoordinator<F>,
  notifications: NotificationDispatcher<N>,
}

impl<S: CacheStorage, F: Fetcher, N: NotificationSink> ProxyWorker<S, F, N> {
  pub fn new(config: &Config, storage: Arc<S>, fetcher: Arc<F>, sink: N) -> Result<Self> {
    let lifecycle = Arc::new(LifecycleManager::new(storage, Arc::clone(&fetcher))?);

    let options = EngineOptions {
      classifier: Classifier::from_config(&config.api),
      api_timeout: config.api.timeout(),
      offline_message: config.api.offline_message.clone(),
      default_document: config.resolve(&config.cache.default_document)?,
    };
    let engine = FetchEngine::new(Arc::clone(&lifecycle), Arc::clone(&fetcher), options);

    let task = SyncTask {
      tag: config.sync.tag.clone(),
      endpoint: config.resolve(&config.sync.endpoint)?,
    };
    let sync = SyncCoordinator::new(fetcher, task, config.sync.success_message.clone());

    let (phase, _) = watch::channel(Phase::Parsed);

    Ok(Self {
      version: config.cache.version.clone(),
      seeds: config.seed_urls()?,
      skip_waiting: config.cache.skip_waiting,
      phase,
      lifecycle,
      engine,
      sync,
      notifications: NotificationDispatcher::new(sink, config.notification.clone()),
    })
  }

  pub fn phase(&self) -> Phase {
    self.phase.borrow().clone()
  }

  /// Seed this worker's generation, then activate it unless it has to wait.
  ///
  /// It activates straight away when `skip_waiting` is set, when nothing is
  /// serving yet, or when the serving generation already is this version.
  /// On failure the previous phase is restored and the old generation keeps serving.
  pub async fn on_install(&self) -> Result<Phase, LifecycleError> {
    let previous = self.phase.send_replace(Phase::Installing);

    if let Err(e) = self.lifecycle.initialize(&self.version, &self.seeds).await {
      self.phase.send_replace(previous);
      return Err(e);
    }
    self.phase.send_replace(Phase::Installed(self.version.clone()));

    let active = self.lifecycle.active_label();
    if self.skip_waiting || active.is_none() || active.as_deref() == Some(self.version.as_str()) {
      self.on_activate()?;
    } else {
      info!(generation = %self.version, "installed, waiting for SKIP_WAITING");
    }

    Ok(self.phase())
  }

  /// Take over: make this version the only generation. Returns pruned labels.
  pub fn on_activate(&self) -> Result<Vec<String>, LifecycleError> {
    let previous = self.phase.send_replace(Phase::Activating);

    match self.lifecycle.activate(&self.version) {
      Ok(removed) => {
        self.phase.send_replace(Phase::Activated(self.version.clone()));
        Ok(removed)
      }
      Err(e) => {
        self.phase.send_replace(previous);
        Err(e)
      }
    }
  }

  /// Handle a client control message. Returns true if it caused activation.
  pub fn on_message(&self, message: &ControlMessage) -> Result<bool, LifecycleError> {
    match message {
      ControlMessage::SkipWaiting => {
        if !matches!(self.phase(), Phase::Installed(_)) {
          return Ok(false);
        }
        info!(generation = %self.version, "SKIP_WAITING received, activating");
        self.on_activate()?;
        Ok(true)
      }
      ControlMessage::Unknown => Ok(false),
    }
  }

  pub async fn on_intercept(&self, request: Request) -> Response {
    self.engine.handle(request).await.response
  }

  /// Like [`Self::on_intercept`], but reports where the response came from.
  pub async fn intercept(&self, request: Request) -> Served {
    self.engine.handle(request).await
  }

  pub async fn on_sync_trigger(&self, tag: &str) -> SyncOutcome {
    self.sync.on_trigger(tag).await
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.sync.subscribe()
  }

  /// Show a notification for an incoming push message.
  pub fn on_push(&self, text: Option<&str>) -> NotificationPayload {
    let payload = self.notifications.payload_for_push(text);
    self.notifications.present(&payload);
    payload
  }

  pub fn on_notification_interaction(&self, action: Option<&str>) -> Effect {
    self.notifications.on_interaction(action)
  }

  pub fn status(&self) -> WorkerStatus {
    let active_generation = self.lifecycle.active_label();
    let entries = match self.lifecycle.active_store().map(|s| s.keys()) {
      Some(Ok(keys)) => keys.len(),
      Some(Err(e)) => {
        warn!(error = %e, "failed to count cache entries");
        0
      }
      None => 0,
    };

    WorkerStatus {
      version: self.version.clone(),
      phase: self.phase(),
      active_generation,
      entries,
    }
  }

  pub fn generations(&self) -> Result<Vec<GenerationInfo>> {
    self.lifecycle.storage().generations()
  }

  /// Identities stored in the serving generation.
  pub fn active_keys(&self) -> Result<Vec<String>> {
    match self.lifecycle.active_store() {
      Some(store) => store.keys(),
      None => Ok(Vec::new()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::testing::{Behavior, MockFetcher};
  use crate::net::Destination;

  fn config(version: &str, skip_waiting: bool) -> Config {
    let yaml = format!(
      r#"
origin: https://pauhu.ai
cache:
  version: {version}
  seed: ["/", "/app.html", "/index.html"]
  skip_waiting: {skip_waiting}
"#
    );
    Config::from_yaml(&yaml).unwrap()
  }

  fn online() -> MockFetcher {
    MockFetcher::new()
      .on("https://pauhu.ai/", MockFetcher::ok("root"))
      .on("https://pauhu.ai/app.html", MockFetcher::ok("app"))
      .on("https://pauhu.ai/index.html", MockFetcher::ok("index"))
  }

  fn worker(
    config: &Config,
    storage: &Arc<SqliteStorage>,
    fetcher: &Arc<MockFetcher>,
  ) -> ProxyWorker<SqliteStorage, MockFetcher> {
    ProxyWorker::new(config, Arc::clone(storage), Arc::clone(fetcher), LogSink).unwrap()
  }

  #[tokio::test]
  async fn test_install_activates_and_serves_offline() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(online());
    let w = worker(&config("v1", true), &storage, &fetcher);

    assert_eq!(w.on_install().await.unwrap(), Phase::Activated("v1".into()));
    assert_eq!(w.status().entries, 3);

    // Offline navigation to an uncached page lands on the default document
    let request = Request::get(Url::parse("https://pauhu.ai/pricing.html").unwrap())
      .with_destination(Destination::Document);
    assert_eq!(w.on_intercept(request).await.body, b"index");
  }

  #[tokio::test]
  async fn test_waiting_until_skip_waiting() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(online());

    let old = worker(&config("v1", false), &storage, &fetcher);
    old.on_install().await.unwrap();

    let new = worker(&config("v2", false), &storage, &fetcher);
    assert_eq!(new.on_install().await.unwrap(), Phase::Installed("v2".into()));
    assert_eq!(new.status().active_generation.as_deref(), Some("v1"));

    assert!(new.on_message(&ControlMessage::SkipWaiting).unwrap());
    assert_eq!(new.phase(), Phase::Activated("v2".into()));
    let labels: Vec<_> = new.generations().unwrap().into_iter().map(|g| g.label).collect();
    assert_eq!(labels, vec!["v2".to_string()]);

    // Already active: nothing more to do
    assert!(!new.on_message(&ControlMessage::SkipWaiting).unwrap());
  }

  #[tokio::test]
  async fn test_skip_waiting_before_install_is_noop() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(online());
    let w = worker(&config("v1", false), &storage, &fetcher);

    assert!(!w.on_message(&ControlMessage::SkipWaiting).unwrap());
    assert!(!w.on_message(&ControlMessage::Unknown).unwrap());
    assert_eq!(w.phase(), Phase::Parsed);
  }

  #[tokio::test]
  async fn test_failed_upgrade_keeps_old_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(online());
    worker(&config("v1", true), &storage, &fetcher)
      .on_install()
      .await
      .unwrap();

    fetcher.set("https://pauhu.ai/app.html", Behavior::Fail);
    let upgrade = worker(&config("v2", true), &storage, &fetcher);
    let err = upgrade.on_install().await.unwrap_err();

    assert!(matches!(err, LifecycleError::SeedFetch { .. }));
    assert_eq!(upgrade.phase(), Phase::Parsed);
    let status = upgrade.status();
    assert_eq!(status.active_generation.as_deref(), Some("v1"));
    assert_eq!(status.entries, 3);
    assert_eq!(upgrade.generations().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_sync_and_notification_entry_points() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(online().on("http://localhost:8000/api/v2/sync", MockFetcher::ok("{}")));
    let w = worker(&config("v1", true), &storage, &fetcher);
    let mut rx = w.subscribe();

    assert_eq!(
      w.on_sync_trigger("pauhu-sync").await,
      SyncOutcome::Synced { delivered: 1 }
    );
    assert!(matches!(rx.try_recv().unwrap(), ClientMessage::SyncSuccess { .. }));

    assert_eq!(w.on_push(Some("hello")).body, "hello");
    assert_eq!(w.on_notification_interaction(Some("close")), Effect::Dismiss);
  }

  #[test]
  fn test_control_message_parsing() {
    let msg: ControlMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(msg, ControlMessage::SkipWaiting);
    let msg: ControlMessage = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
    assert_eq!(msg, ControlMessage::Unknown);
  }
}
