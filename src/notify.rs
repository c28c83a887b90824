//! Notification rendering and interaction routing.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::NotificationConfig;

pub const ACTION_OPEN_DASHBOARD: &str = "open-dashboard";
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub id: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

/// What the client should do after an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", content = "url", rename_all = "snake_case")]
pub enum Effect {
  OpenDashboard(String),
  Dismiss,
  OpenRoot(String),
}

/// Where notifications are actually shown.
pub trait NotificationSink: Send + Sync {
  fn show(&self, payload: &NotificationPayload) -> Result<()>;

  /// Close the currently shown notification.
  fn close(&self) -> Result<()>;
}

/// Sink that renders notifications into the log.
pub struct LogSink;

impl NotificationSink for LogSink {
  fn show(&self, payload: &NotificationPayload) -> Result<()> {
    let actions: Vec<&str> = payload.actions.iter().map(|a| a.title.as_str()).collect();
    info!(title = %payload.title, body = %payload.body, ?actions, "notification");
    Ok(())
  }

  fn close(&self) -> Result<()> {
    Ok(())
  }
}

pub struct NotificationDispatcher<N: NotificationSink> {
  sink: N,
  config: NotificationConfig,
}

impl<N: NotificationSink> NotificationDispatcher<N> {
  pub fn new(sink: N, config: NotificationConfig) -> Self {
    Self { sink, config }
  }

  /// Build the payload for an incoming push, falling back to the default body.
  pub fn payload_for_push(&self, text: Option<&str>) -> NotificationPayload {
    let body = text
      .filter(|t| !t.is_empty())
      .unwrap_or(&self.config.default_body)
      .to_string();

    NotificationPayload {
      title: self.config.title.clone(),
      body,
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      vibrate: self.config.vibrate.clone(),
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key: 1,
      },
      actions: self
        .config
        .actions
        .iter()
        .map(|a| NotificationAction {
          id: a.id.clone(),
          title: a.title.clone(),
          icon: a.icon.clone(),
        })
        .collect(),
    }
  }

  pub fn present(&self, payload: &NotificationPayload) {
    if let Err(e) = self.sink.show(payload) {
      warn!(error = %e, "failed to show notification");
    }
  }

  /// Close the notification and decide what to open.
  pub fn on_interaction(&self, action: Option<&str>) -> Effect {
    if let Err(e) = self.sink.close() {
      warn!(error = %e, "failed to close notification");
    }

    match action {
      Some(ACTION_OPEN_DASHBOARD) => Effect::OpenDashboard(self.config.dashboard_url.clone()),
      Some(ACTION_CLOSE) => Effect::Dismiss,
      _ => Effect::OpenRoot(self.config.root_url.clone()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  #[derive(Default)]
  struct RecordingSink {
    shown: Mutex<Vec<NotificationPayload>>,
    closed: AtomicUsize,
  }

  impl NotificationSink for &RecordingSink {
    fn show(&self, payload: &NotificationPayload) -> Result<()> {
      self.shown.lock().unwrap().push(payload.clone());
      Ok(())
    }

    fn close(&self) -> Result<()> {
      self.closed.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[test]
  fn test_push_payload_shape() {
    let sink = RecordingSink::default();
    let dispatcher = NotificationDispatcher::new(&sink, NotificationConfig::default());

    let payload = dispatcher.payload_for_push(Some("Model ready"));
    dispatcher.present(&payload);

    let shown = sink.shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Pauhu AI");
    assert_eq!(shown[0].body, "Model ready");
    assert_eq!(shown[0].vibrate, vec![100, 50, 100]);
    let ids: Vec<_> = shown[0].actions.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec![ACTION_OPEN_DASHBOARD, ACTION_CLOSE]);
  }

  #[test]
  fn test_empty_push_uses_default_body() {
    let dispatcher = NotificationDispatcher::new(LogSink, NotificationConfig::default());
    assert_eq!(dispatcher.payload_for_push(None).body, "Pauhu AI notification");
    assert_eq!(dispatcher.payload_for_push(Some("")).body, "Pauhu AI notification");
  }

  #[test]
  fn test_interaction_effects() {
    let sink = RecordingSink::default();
    let dispatcher = NotificationDispatcher::new(&sink, NotificationConfig::default());

    assert_eq!(
      dispatcher.on_interaction(Some("open-dashboard")),
      Effect::OpenDashboard("/dashboard.html".to_string())
    );
    assert_eq!(dispatcher.on_interaction(Some("close")), Effect::Dismiss);
    assert_eq!(
      dispatcher.on_interaction(Some("snooze")),
      Effect::OpenRoot("/".to_string())
    );
    assert_eq!(dispatcher.on_interaction(None), Effect::OpenRoot("/".to_string()));
    assert_eq!(sink.closed.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn test_effect_wire_format() {
    assert_eq!(
      serde_json::to_value(Effect::OpenDashboard("/d".into())).unwrap(),
      serde_json::json!({"effect": "open_dashboard", "url": "/d"})
    );
    assert_eq!(
      serde_json::to_value(Effect::Dismiss).unwrap(),
      serde_json::json!({"effect": "dismiss"})
    );
  }
}
