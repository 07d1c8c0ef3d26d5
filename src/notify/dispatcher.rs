use super::channels::{ChannelTransport, EmailRelay, MatrixRoom, SlackWebhook, TelegramBot};
use super::smtp;
use super::types::{ChannelKind, DeliveryReport, Notification, NotificationSettings, NotifyError};
use crate::events::{Event, EventHandler, Severity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Channels that should receive an event of the given severity. Critical
/// and error fan out everywhere, warnings go to chat channels, info goes
/// to the lightest channel only.
pub fn route_channels(severity: Severity, configured: &[ChannelKind]) -> Vec<ChannelKind> {
    let mut channels = configured.to_vec();
    channels.sort();
    channels.dedup();

    match severity {
        Severity::Critical | Severity::Error => channels,
        Severity::Warning => {
            let chat: Vec<ChannelKind> = channels.iter().copied().filter(|c| c.is_chat()).collect();
            if chat.is_empty() {
                channels.into_iter().take(1).collect()
            } else {
                chat
            }
        }
        Severity::Info => channels.into_iter().take(1).collect(),
    }
}

struct Envelope {
    notification: Notification,
    reply: Option<oneshot::Sender<DeliveryReport>>,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub rejected: u64,
}

type TransportMap = HashMap<ChannelKind, Arc<dyn ChannelTransport>>;

/// Bounded queue feeding a fixed worker pool. Producers wait a bounded
/// time for room; workers make one delivery attempt per notification.
pub struct NotificationDispatcher {
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    transports: Arc<TransportMap>,
    settings: NotificationSettings,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Start the worker pool over explicit transports. Requires a running
    /// tokio runtime.
    pub fn new(settings: NotificationSettings, transports: Vec<Arc<dyn ChannelTransport>>) -> Self {
        let transports: Arc<TransportMap> = Arc::new(
            transports
                .into_iter()
                .map(|transport| (transport.kind(), transport))
                .collect(),
        );
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..settings.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&transports),
                    settings.delivery_timeout(),
                    Arc::clone(&counters),
                ))
            })
            .collect::<Vec<_>>();

        info!(
            "Notification dispatcher started: {} workers, queue {}, channels {:?}",
            workers.len(),
            settings.queue_capacity,
            transports.keys().collect::<Vec<_>>()
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            transports,
            settings,
            counters,
        }
    }

    /// Build transports for every channel present in the settings
    pub fn from_settings(settings: NotificationSettings) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;

        let mut transports: Vec<Arc<dyn ChannelTransport>> = Vec::new();
        if let Some(slack) = &settings.slack {
            transports.push(Arc::new(SlackWebhook::new(http.clone(), slack.clone())));
        }
        if let Some(matrix) = &settings.matrix {
            transports.push(Arc::new(MatrixRoom::new(http.clone(), matrix.clone())));
        }
        if let Some(telegram) = &settings.telegram {
            transports.push(Arc::new(TelegramBot::new(http.clone(), telegram.clone())));
        }
        if let Some(email) = &settings.email {
            smtp::check_settings(email)?;
            transports.push(Arc::new(EmailRelay::new(email.clone())));
        }

        Ok(Self::new(settings, transports))
    }

    /// Configured channels, lightest first
    pub fn channels(&self) -> Vec<ChannelKind> {
        let mut channels: Vec<ChannelKind> = self.transports.keys().copied().collect();
        channels.sort();
        channels
    }

    pub fn route(&self, severity: Severity) -> Vec<ChannelKind> {
        route_channels(severity, &self.channels())
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Queue a notification without waiting for delivery
    pub async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.enqueue(Envelope {
            notification,
            reply: None,
        })
        .await
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<(), NotifyError> {
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(NotifyError::ShuttingDown)?;

        let wait = self.settings.send_wait();
        match sender.send_timeout(envelope, wait).await {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Notification queue full, rejected after {:?}", wait);
                Err(NotifyError::QueueFull {
                    waited_ms: wait.as_millis() as u64,
                })
            }
            Err(SendTimeoutError::Closed(_)) => Err(NotifyError::ShuttingDown),
        }
    }

    /// Render the event for each routed channel, queue it, and wait for
    /// the per-channel outcomes. A channel whose enqueue failed reports that
    /// error instead of a delivery result.
    pub async fn send_event(&self, event: &Event) -> Result<Vec<DeliveryReport>, NotifyError> {
        let routed = self.route(event.severity);
        if routed.is_empty() {
            debug!("No channel configured for {} event {}", event.severity, event.id);
            return Ok(Vec::new());
        }

        let mut pending = Vec::with_capacity(routed.len());
        let mut reports = Vec::with_capacity(routed.len());
        for channel in routed {
            let Some(transport) = self.transports.get(&channel) else {
                continue;
            };
            let notification = Notification::from_event(event, channel, transport.recipient());
            let notification_id = notification.id;
            let (reply, outcome) = oneshot::channel();

            match self
                .enqueue(Envelope {
                    notification,
                    reply: Some(reply),
                })
                .await
            {
                Ok(()) => pending.push((notification_id, channel, outcome)),
                Err(NotifyError::ShuttingDown) => return Err(NotifyError::ShuttingDown),
                Err(err) => reports.push(DeliveryReport {
                    notification_id,
                    channel,
                    result: Err(err),
                }),
            }
        }

        for (notification_id, channel, outcome) in pending {
            reports.push(outcome.await.unwrap_or(DeliveryReport {
                notification_id,
                channel,
                result: Err(NotifyError::Dropped),
            }));
        }
        reports.sort_by_key(|report| report.channel);
        Ok(reports)
    }

    /// Close the queue, let workers drain it within the grace period, then
    /// abort whatever is still running.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut guard| guard.take());
        drop(sender);

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .map(|mut guard| guard.drain(..).collect())
            .unwrap_or_default();
        if handles.is_empty() {
            return;
        }
        let aborts: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();

        let grace = self.settings.shutdown_grace();
        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => info!("Notification dispatcher drained and stopped"),
            Err(_) => {
                warn!(
                    "Notification workers still busy after {:?}, aborting {}",
                    grace,
                    aborts.len()
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Envelope>>>,
    transports: Arc<TransportMap>,
    delivery_timeout: Duration,
    counters: Arc<Counters>,
) {
    loop {
        let envelope = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(envelope) = envelope else {
            debug!("Notification worker {} exiting", id);
            break;
        };

        let notification = &envelope.notification;
        let result = deliver_once(&transports, notification, delivery_timeout).await;
        match &result {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Worker {} delivered {} via {}",
                    id, notification.id, notification.channel
                );
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Worker {} failed to deliver {}: {}", id, notification.id, err);
            }
        }

        if let Some(reply) = envelope.reply {
            let _ = reply.send(DeliveryReport {
                notification_id: notification.id,
                channel: notification.channel,
                result,
            });
        }
    }
}

async fn deliver_once(
    transports: &TransportMap,
    notification: &Notification,
    delivery_timeout: Duration,
) -> Result<(), NotifyError> {
    let transport = transports
        .get(&notification.channel)
        .ok_or(NotifyError::ChannelNotConfigured(notification.channel))?;

    match tokio::time::timeout(delivery_timeout, transport.deliver(notification)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout {
            channel: notification.channel,
            after_ms: delivery_timeout.as_millis() as u64,
        }),
    }
}

#[async_trait]
impl EventHandler for NotificationDispatcher {
    fn name(&self) -> &str {
        "notification-dispatcher"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let reports = self.send_event(event).await?;
        let failed = reports.iter().filter(|report| !report.delivered()).count();
        if failed > 0 {
            anyhow::bail!(
                "{} of {} notifications for event {} were not delivered",
                failed,
                reports.len(),
                event.id
            );
        }
        Ok(())
    }
}
