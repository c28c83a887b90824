//! Best-effort background sync run when connectivity comes back.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;

use crate::net::{Fetcher, Request};

/// Message pushed to every connected observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
  SyncSuccess { message: String },
}

/// A deferred unit of work: one tag, one endpoint, one attempt.
#[derive(Debug, Clone)]
pub struct SyncTask {
  pub tag: String,
  pub endpoint: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
  /// Endpoint answered 2xx; `delivered` observers were notified
  Synced { delivered: usize },
  /// Endpoint unreachable or unhappy; nothing was reported
  Dropped,
  /// The trigger tag does not belong to this coordinator
  Ignored,
}

/// Runs the registered sync task and fans out the result.
pub struct SyncCoordinator<F: Fetcher> {
  fetcher: Arc<F>,
  task: SyncTask,
  success_message: String,
  observers: broadcast::Sender<ClientMessage>,
}

impl<F: Fetcher> SyncCoordinator<F> {
  pub fn new(fetcher: Arc<F>, task: SyncTask, success_message: impl Into<String>) -> Self {
    let (observers, _) = broadcast::channel(16);
    Self {
      fetcher,
      task,
      success_message: success_message.into(),
      observers,
    }
  }

  /// Register an observer. It only sees messages sent after this call.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.observers.subscribe()
  }

  pub fn observer_count(&self) -> usize {
    self.observers.receiver_count()
  }

  /// Connectivity-restored signal for `tag`.
  pub async fn on_trigger(&self, tag: &str) -> SyncOutcome {
    if tag != self.task.tag {
      debug!(tag, "ignoring sync trigger for unknown tag");
      return SyncOutcome::Ignored;
    }
    self.run_sync(&self.task).await
  }

  /// Make a single attempt at `task`. Failures are dropped, never retried.
  pub async fn run_sync(&self, task: &SyncTask) -> SyncOutcome {
    match self.fetcher.fetch(&Request::get(task.endpoint.clone())).await {
      Ok(response) if response.is_ok() => {
        info!(tag = %task.tag, endpoint = %task.endpoint, "sync succeeded");
        let message = ClientMessage::SyncSuccess {
          message: self.success_message.clone(),
        };
        // No observers is not an error
        let delivered = self.observers.send(message).unwrap_or(0);
        SyncOutcome::Synced { delivered }
      }
      Ok(response) => {
        debug!(tag = %task.tag, status = response.status, "sync endpoint refused, dropping");
        SyncOutcome::Dropped
      }
      Err(e) => {
        debug!(tag = %task.tag, error = %e, "sync endpoint not available, dropping");
        SyncOutcome::Dropped
      }
    }
  }
}
