use crate::events::{Event, EventType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Delivery channel. Variants are ordered from lightest to heaviest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Slack,
    Matrix,
    Telegram,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Matrix => "matrix",
            Self::Telegram => "telegram",
            Self::Email => "email",
        }
    }

    /// Chat-style channels receive warnings
    pub fn is_chat(&self) -> bool {
        !matches!(self, Self::Email)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info => Self::Low,
            Severity::Warning => Self::Normal,
            Severity::Error => Self::High,
            Severity::Critical => Self::Critical,
        }
    }
}

/// A rendered message bound for one channel. Lives for a single delivery
/// attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub channel: ChannelKind,
    pub recipient: String,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub severity: Severity,
    pub source_event: Uuid,
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Render an event for a channel
    pub fn from_event(event: &Event, channel: ChannelKind, recipient: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            recipient: recipient.into(),
            title: format!(
                "{} [{}] {}",
                severity_emoji(event.severity),
                event.severity.as_str().to_uppercase(),
                event.event_type
            ),
            body: render_body(event),
            priority: event.severity.into(),
            severity: event.severity,
            source_event: event.id,
            event_type: event.event_type,
            created_at: Utc::now(),
        }
    }
}

pub fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🚨",
        Severity::Error => "❌",
        Severity::Warning => "⚠️",
        Severity::Info => "ℹ️",
    }
}

fn render_body(event: &Event) -> String {
    let mut body = event.message.clone();
    if let Some(fields) = event.payload.as_object()
        && !fields.is_empty()
    {
        let mut keys: Vec<&String> = fields.keys().collect();
        keys.sort();
        body.push('\n');
        for key in keys {
            let value = match &fields[key] {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            body.push_str(&format!("\n{key}: {value}"));
        }
    }
    body.push_str(&format!(
        "\n\nsource: {} at {}",
        event.source,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    body
}

/// Outcome of one delivery attempt, reported back to `send_event` callers
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub notification_id: Uuid,
    pub channel: ChannelKind,
    pub result: Result<(), NotifyError>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification queue full after waiting {waited_ms}ms")]
    QueueFull { waited_ms: u64 },
    #[error("Notification dispatcher is shutting down")]
    ShuttingDown,
    #[error("Channel {0} is not configured")]
    ChannelNotConfigured(ChannelKind),
    #[error("Delivery to {channel} failed: {message}")]
    Delivery { channel: ChannelKind, message: String },
    #[error("Delivery to {channel} timed out after {after_ms}ms")]
    Timeout { channel: ChannelKind, after_ms: u64 },
    #[error("Delivery outcome lost before a worker reported it")]
    Dropped,
    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackSettings {
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSettings {
    pub homeserver: String,
    pub access_token: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default = "default_helo")]
    pub helo_name: String,
}

fn default_smtp_port() -> u16 {
    25
}

fn default_helo() -> String {
    "localhost".to_string()
}

/// Dispatcher sizing plus the configured channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub queue_capacity: usize,
    pub workers: usize,
    pub send_wait_ms: u64,
    pub delivery_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub slack: Option<SlackSettings>,
    pub telegram: Option<TelegramSettings>,
    pub matrix: Option<MatrixSettings>,
    pub email: Option<EmailSettings>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            workers: 4,
            send_wait_ms: 5_000,
            delivery_timeout_ms: 10_000,
            shutdown_grace_ms: 10_000,
            slack: None,
            telegram: None,
            matrix: None,
            email: None,
        }
    }
}

impl NotificationSettings {
    pub fn send_wait(&self) -> Duration {
        Duration::from_millis(self.send_wait_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn configured_channels(&self) -> Vec<ChannelKind> {
        let mut channels = Vec::new();
        if self.slack.is_some() {
            channels.push(ChannelKind::Slack);
        }
        if self.matrix.is_some() {
            channels.push(ChannelKind::Matrix);
        }
        if self.telegram.is_some() {
            channels.push(ChannelKind::Telegram);
        }
        if self.email.is_some() {
            channels.push(ChannelKind::Email);
        }
        channels
    }
}
