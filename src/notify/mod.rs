//! Notification dispatch for verification events.
//!
//! Events are rendered once per routed channel and pushed through a bounded
//! queue to a pool of delivery workers:
//!
//! ```text
//! Event ─▶ route_channels ─▶ [bounded queue] ─▶ worker ─▶ Slack / Matrix / Telegram / Email
//! ```
//!
//! Producers wait at most `send_wait_ms` for queue room and then receive
//! [`NotifyError::QueueFull`]. Each delivery is a single attempt bounded by
//! `delivery_timeout_ms`.

pub mod channels;
pub mod dispatcher;
pub mod smtp;
pub mod types;


pub use channels::{ChannelTransport, EmailRelay, MatrixRoom, SlackWebhook, TelegramBot};
pub use dispatcher::{DispatchStats, NotificationDispatcher, route_channels};
pub use types::*;
