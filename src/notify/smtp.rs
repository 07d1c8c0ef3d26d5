//! Minimal plaintext SMTP submission over a tokio TCP stream.
//!
//! Speaks just enough of RFC 5321 to hand one message to a relay: EHLO,
//! optional AUTH PLAIN, MAIL/RCPT/DATA and QUIT. There is no STARTTLS, so
//! credentials are only sent to a relay on the loopback interface.

use super::types::{ChannelKind, EmailSettings, NotifyError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use std::net::IpAddr;
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

fn smtp_error(message: impl Into<String>) -> NotifyError {
    NotifyError::Delivery {
        channel: ChannelKind::Email,
        message: message.into(),
    }
}

/// `localhost` or a loopback address
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Settings that would send AUTH PLAIN over an unencrypted link are refused
pub fn check_settings(settings: &EmailSettings) -> Result<(), NotifyError> {
    if settings.to.is_empty() {
        return Err(NotifyError::InvalidConfig("email has no recipients".into()));
    }
    let wants_auth = settings.username.is_some() || settings.password.is_some();
    if wants_auth && !is_loopback_host(&settings.smtp_host) {
        return Err(NotifyError::InvalidConfig(format!(
            "refusing SMTP AUTH to {} without TLS; use a relay on localhost",
            settings.smtp_host
        )));
    }
    Ok(())
}

/// Deliver one message to every configured recipient
pub async fn send_mail(settings: &EmailSettings, subject: &str, body: &str) -> Result<(), NotifyError> {
    check_settings(settings)?;

    let stream = TcpStream::connect((settings.smtp_host.as_str(), settings.smtp_port))
        .await
        .map_err(|e| smtp_error(format!("connect to {}:{} failed: {e}", settings.smtp_host, settings.smtp_port)))?;
    let (read_half, write_half) = stream.into_split();
    let mut session = SmtpSession {
        reader: BufReader::new(read_half),
        writer: write_half,
    };

    session.expect(220).await?;
    session
        .command(&format!("EHLO {}", settings.helo_name), 250)
        .await?;

    if let (Some(user), Some(password)) = (&settings.username, &settings.password) {
        let token = STANDARD.encode(format!("\0{user}\0{password}"));
        session.command(&format!("AUTH PLAIN {token}"), 235).await?;
    }

    session
        .command(&format!("MAIL FROM:<{}>", settings.from), 250)
        .await?;
    for recipient in &settings.to {
        session
            .command(&format!("RCPT TO:<{recipient}>"), 250)
            .await?;
    }
    session.command("DATA", 354).await?;

    let message = format_message(settings, subject, body);
    session.write_raw(&message).await?;
    session.write_raw(".\r\n").await?;
    session.expect(250).await?;

    // The message is accepted at this point; a failed QUIT changes nothing
    let _ = session.command("QUIT", 221).await;
    debug!("Mail accepted for {} recipients", settings.to.len());
    Ok(())
}

struct SmtpSession<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> SmtpSession<R, W> {
    async fn write_raw(&mut self, data: &str) -> Result<(), NotifyError> {
        self.writer
            .write_all(data.as_bytes())
            .await
            .map_err(|e| smtp_error(format!("write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| smtp_error(format!("flush failed: {e}")))
    }

    async fn command(&mut self, line: &str, expected: u16) -> Result<String, NotifyError> {
        self.write_raw(&format!("{line}\r\n")).await?;
        self.expect(expected).await
    }

    /// Read a possibly multi-line reply and check its code
    async fn expect(&mut self, expected: u16) -> Result<String, NotifyError> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| smtp_error(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(smtp_error("server closed the connection"));
            }

            let line = line.trim_end();
            let code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| smtp_error(format!("malformed reply: {line}")))?;
            text.push_str(line.get(4..).unwrap_or(""));

            if line.as_bytes().get(3) == Some(&b'-') {
                text.push('\n');
                continue;
            }
            if code != expected {
                return Err(smtp_error(format!("expected {expected}, server said: {line}")));
            }
            return Ok(text);
        }
    }
}

/// Headers plus a dot-stuffed CRLF body
pub fn format_message(settings: &EmailSettings, subject: &str, body: &str) -> String {
    let mut message = String::new();
    message.push_str(&format!("From: <{}>\r\n", settings.from));
    message.push_str(&format!("To: {}\r\n", settings.to.join(", ")));
    message.push_str(&format!("Subject: {}\r\n", encode_header(subject)));
    message.push_str(&format!("Date: {}\r\n", chrono::Utc::now().to_rfc2822()));
    message.push_str(&format!("Message-ID: <{}@modelprobe>\r\n", Uuid::new_v4()));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");

    for line in body.lines() {
        if line.starts_with('.') {
            message.push('.');
        }
        message.push_str(line);
        message.push_str("\r\n");
    }
    message
}

/// RFC 2047 encoded-word for non-ASCII subjects
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value))
    }
}
