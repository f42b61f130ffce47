//! Delivery collaborators: the per-recipient transport and the quota provider.
//!
//! The dispatch engine only sees the [`Transport`] and
//! [`quota::QuotaProvider`] traits. Concrete adapters:
//! - **SMTP**: [`smtp::SmtpMailer`] via lettre
//! - **Quota**: [`quota::StaticQuota`] and [`quota::HttpQuota`]

pub mod quota;
pub mod smtp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::list::{RecipientList, SendOptions};
use crate::message::RenderedMessage;

/// Immutable per-list snapshot shared by every in-flight send of that list.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub list_id: String,
    pub sender: String,
    pub message: RenderedMessage,
    pub options: SendOptions,
}

impl From<&RecipientList> for Envelope {
    fn from(list: &RecipientList) -> Self {
        Self {
            list_id: list.id.clone(),
            sender: list.sender.clone(),
            message: list.message.clone(),
            options: list.options.clone(),
        }
    }
}

/// What the provider answered for one accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub response: String,
}

/// Sends one copy of a list's message to one recipient.
///
/// Each call resolves exactly once, to a receipt or a failure.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, envelope: &Envelope, to: &str) -> Result<SendReceipt, TransportError>;
}
