//! SMTP transport via lettre.
//!
//! lettre's `SmtpTransport` is blocking, so each send runs on the blocking
//! pool. The transport is pooled internally and cheap to clone.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::Response;
use lettre::{Message, SmtpTransport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, TransportError};
use crate::transport::{Envelope, SendReceipt, Transport};

/// Port on which the relay speaks implicit TLS; every other port upgrades with STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

// ── Configuration ───────────────────────────────────────────────────

/// SMTP relay configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl SmtpConfig {
    /// Build config from environment variables. `NEWSLETTER_SMTP_HOST` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("NEWSLETTER_SMTP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("NEWSLETTER_SMTP_HOST".into()))?;

        let port = match std::env::var("NEWSLETTER_SMTP_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "NEWSLETTER_SMTP_PORT".into(),
                message: format!("expected a port number, got {raw:?}"),
            })?,
            Err(_) => 587,
        };

        let username = std::env::var("NEWSLETTER_SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("NEWSLETTER_SMTP_PASSWORD").unwrap_or_default());

        Ok(Self {
            host,
            port,
            username,
            password,
        })
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Delivers each copy through an authenticated SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, ConfigError> {
        let builder = if config.port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(|e| ConfigError::InvalidValue {
            key: "NEWSLETTER_SMTP_HOST".into(),
            message: format!("SMTP relay error: {e}"),
        })?
        .port(config.port);

        let builder = if config.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ))
        };

        tracing::info!("SMTP relay {}:{}", config.host, config.port);
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Transport for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, envelope: &Envelope, to: &str) -> Result<SendReceipt, TransportError> {
        let email = build_message(envelope, to)?;
        let message_id = email.headers().get_raw("Message-ID").map(str::to_string);

        let transport = self.transport.clone();
        let response = tokio::task::spawn_blocking(move || {
            lettre::Transport::send(&transport, &email)
        })
        .await
        .map_err(|e| TransportError::SendFailed(format!("send task panicked: {e}")))?
        .map_err(|e| TransportError::SendFailed(format!("SMTP send failed: {e}")))?;

        Ok(receipt(&response, message_id))
    }
}

/// Relay reply as `<code> <text lines joined by spaces>`.
fn receipt(response: &Response, message_id: Option<String>) -> SendReceipt {
    let lines: Vec<&str> = response.message().collect();
    SendReceipt {
        message_id,
        response: format!("{} {}", response.code(), lines.join(" ")),
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address.parse().map_err(|e| TransportError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

/// Build the multipart (plain + HTML) message addressed to a single recipient.
pub fn build_message(envelope: &Envelope, to: &str) -> Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(mailbox(&envelope.sender)?)
        .to(mailbox(to)?)
        .subject(envelope.message.subject.as_str())
        .message_id(None);

    for cc in &envelope.options.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in &envelope.options.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }
    if let Some(reply_to) = &envelope.options.reply_to {
        builder = builder.reply_to(mailbox(reply_to)?);
    }

    builder
        .multipart(MultiPart::alternative_plain_html(
            envelope.message.plain.clone(),
            envelope.message.html.clone(),
        ))
        .map_err(|e| TransportError::Build(e.to_string()))
}
