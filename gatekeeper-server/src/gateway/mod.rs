//! Messaging gateway abstraction.
//!
//! The admission core talks to the chat platform only through
//! `MessagingGateway`. `TelegramGateway` is the production implementation;
//! tests use a recording fake.

mod telegram;

pub use telegram::TelegramGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::{ChatId, MessageId, UserId};

/// Failure talking to the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request never got a usable response (network, timeout, bad body).
    #[error("{operation} request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    /// The platform answered and refused the request.
    #[error("{operation} rejected by platform: {description}")]
    Rejected {
        operation: &'static str,
        description: String,
    },
}

impl GatewayError {
    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            message: message.into(),
        }
    }

    pub fn rejected(operation: &'static str, description: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            description: description.into(),
        }
    }
}

/// Outbound capabilities the admission flow needs from a chat platform.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Post a message and return its id.
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, GatewayError>;

    /// Replace the text of a message. Fails if the message no longer exists.
    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), GatewayError>;

    /// Delete messages. A failure for one id does not stop the others.
    async fn delete_messages(
        &self,
        chat_id: ChatId,
        message_ids: &[MessageId],
    ) -> Result<(), GatewayError>;

    /// Ban a member from a chat until the given instant.
    async fn ban_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: DateTime<Utc>,
    ) -> Result<(), GatewayError>;
}
