//! Verification events and the in-process bus that carries them.
//!
//! Publishing is fire-and-forget: each subscribed handler runs on its own
//! task and a failing handler only produces a log line. [`EventBus::flush`]
//! waits for handlers still running, which owners call before shutdown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    VerificationStarted,
    VerificationCompleted,
    VerificationFailed,
    ScoreChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerificationStarted => "verification.started",
            Self::VerificationCompleted => "verification.completed",
            Self::VerificationFailed => "verification.failed",
            Self::ScoreChanged => "model.score.changed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            severity,
            source: source.into(),
            message: message.into(),
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Event consumer registered on the [`EventBus`]
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

pub type SubscriptionId = Uuid;

struct Subscription {
    handler: Arc<dyn EventHandler>,
    event_types: Vec<EventType>,
}

impl Subscription {
    fn wants(&self, event_type: EventType) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event_type)
    }
}

/// Publish/subscribe hub. Clones share subscriptions and pending handlers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<DashMap<SubscriptionId, Subscription>>,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for the given event types; an empty list
    /// subscribes to everything.
    pub fn subscribe(
        &self,
        handler: Arc<dyn EventHandler>,
        event_types: Vec<EventType>,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        debug!("Subscribed handler '{}' to {:?}", handler.name(), event_types);
        self.subscriptions.insert(
            id,
            Subscription {
                handler,
                event_types,
            },
        );
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Fan the event out to every interested handler on its own task.
    /// Returns how many handlers were scheduled.
    pub fn publish(&self, event: Event) -> usize {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().wants(event.event_type))
            .map(|entry| Arc::clone(&entry.value().handler))
            .collect();

        let event = Arc::new(event);
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Reap handlers that already finished
        while pending.try_join_next().is_some() {}

        for handler in &handlers {
            let handler = Arc::clone(handler);
            let event = Arc::clone(&event);
            pending.spawn(async move {
                if let Err(err) = handler.handle(&event).await {
                    warn!(
                        "Event handler '{}' failed on {} ({}): {}",
                        handler.name(),
                        event.event_type,
                        event.id,
                        err
                    );
                }
            });
        }

        debug!("Published {} to {} handlers", event.event_type, handlers.len());
        handlers.len()
    }

    /// Wait up to `grace` for running handlers; stragglers are aborted
    pub async fn flush(&self, grace: Duration) {
        let mut pending = {
            let mut guard = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        if pending.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(grace, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Aborting {} event handlers still running after {:?}",
                pending.len(),
                grace
            );
            pending.shutdown().await;
        }
    }

    /// Drop every subscription
    pub fn shutdown(&self) {
        self.subscriptions.clear();
    }
}
