use super::smtp;
use super::types::{
    ChannelKind, EmailSettings, MatrixSettings, Notification, NotifyError, SlackSettings,
    TelegramSettings,
};
use crate::events::Severity;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use url::Url;

/// One delivery backend. Implementations make a single attempt per call.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Default recipient for notifications routed to this channel
    fn recipient(&self) -> String;

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#d32f2f",
        Severity::Error => "#f44336",
        Severity::Warning => "#ff9800",
        Severity::Info => "#2196f3",
    }
}

async fn check_response(
    channel: ChannelKind,
    response: reqwest::Response,
) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Delivery {
        channel,
        message: format!("HTTP {}: {}", status.as_u16(), body.trim()),
    })
}

fn request_failure(channel: ChannelKind, err: reqwest::Error) -> NotifyError {
    NotifyError::Delivery {
        channel,
        message: err.to_string(),
    }
}

/// Incoming-webhook poster
pub struct SlackWebhook {
    http: reqwest::Client,
    settings: SlackSettings,
}

impl SlackWebhook {
    pub fn new(http: reqwest::Client, settings: SlackSettings) -> Self {
        Self { http, settings }
    }
}

#[async_trait]
impl ChannelTransport for SlackWebhook {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    fn recipient(&self) -> String {
        self.settings
            .channel
            .clone()
            .unwrap_or_else(|| "webhook".to_string())
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut payload = json!({
            "text": format!("*{}*", notification.title),
            "attachments": [{
                "color": severity_color(notification.severity),
                "text": notification.body,
            }],
        });
        if let Some(channel) = &self.settings.channel {
            payload["channel"] = json!(channel);
        }
        if let Some(username) = &self.settings.username {
            payload["username"] = json!(username);
        }

        let response = self
            .http
            .post(&self.settings.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| request_failure(ChannelKind::Slack, e))?;
        check_response(ChannelKind::Slack, response).await?;
        debug!("Slack notification {} delivered", notification.id);
        Ok(())
    }
}

/// Bot API `sendMessage` caller
pub struct TelegramBot {
    http: reqwest::Client,
    settings: TelegramSettings,
}

impl TelegramBot {
    pub fn new(http: reqwest::Client, settings: TelegramSettings) -> Self {
        Self { http, settings }
    }
}

#[async_trait]
impl ChannelTransport for TelegramBot {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn recipient(&self) -> String {
        self.settings.chat_id.clone()
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.bot_token
        );
        let payload = json!({
            "chat_id": notification.recipient,
            "text": format!("{}\n\n{}", notification.title, notification.body),
            "disable_web_page_preview": true,
        });

        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| request_failure(ChannelKind::Telegram, e))?;
        check_response(ChannelKind::Telegram, response).await?;
        debug!("Telegram notification {} delivered", notification.id);
        Ok(())
    }
}

/// Client-server API room messenger
pub struct MatrixRoom {
    http: reqwest::Client,
    settings: MatrixSettings,
}

impl MatrixRoom {
    pub fn new(http: reqwest::Client, settings: MatrixSettings) -> Self {
        Self { http, settings }
    }

    /// Room ids carry `!` and `:`, so they go through path-segment encoding
    pub fn send_url(&self, room_id: &str) -> Result<Url, NotifyError> {
        let mut url = Url::parse(&self.settings.homeserver)
            .map_err(|e| NotifyError::InvalidConfig(format!("matrix homeserver: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| NotifyError::InvalidConfig("matrix homeserver cannot be a base".into()))?
            .pop_if_empty()
            .extend(["_matrix", "client", "r0", "rooms", room_id, "send", "m.room.message"]);
        Ok(url)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl ChannelTransport for MatrixRoom {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Matrix
    }

    fn recipient(&self) -> String {
        self.settings.room_id.clone()
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let url = self.send_url(&notification.recipient)?;
        let payload = json!({
            "msgtype": "m.text",
            "body": format!("{}\n\n{}", notification.title, notification.body),
            "format": "org.matrix.custom.html",
            "formatted_body": format!(
                "<font color=\"{}\"><b>{}</b></font><br/>{}",
                severity_color(notification.severity),
                escape_html(&notification.title),
                escape_html(&notification.body).replace('\n', "<br/>")
            ),
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.settings.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| request_failure(ChannelKind::Matrix, e))?;
        check_response(ChannelKind::Matrix, response).await?;
        debug!("Matrix notification {} delivered", notification.id);
        Ok(())
    }
}

/// SMTP relay submitter
pub struct EmailRelay {
    settings: EmailSettings,
}

impl EmailRelay {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ChannelTransport for EmailRelay {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn recipient(&self) -> String {
        self.settings.to.join(", ")
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        smtp::send_mail(&self.settings, &notification.title, &notification.body).await
    }
}
