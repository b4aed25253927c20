//! Pending-member record and the identifiers it is keyed by.
//!
//! Platform ids are wrapped in newtypes so a chat id can never be passed
//! where a user id is expected.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype for a chat platform user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Newtype for a chat id. Group chats on most platforms use negative ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Newtype for a message id, unique within one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Composite key of a pending admission: one record per (user, chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberKey {
    pub user_id: UserId,
    pub chat_id: ChatId,
}

impl MemberKey {
    pub fn new(user_id: impl Into<UserId>, chat_id: impl Into<ChatId>) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user {} in chat {}", self.user_id, self.chat_id)
    }
}

/// A user who joined a guarded chat, as seen by the join event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoiningUser {
    pub id: UserId,
    pub display_name: String,
}

/// Which chats a store scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatScope {
    All,
    Chat(ChatId),
}

impl ChatScope {
    pub fn contains(&self, chat_id: ChatId) -> bool {
        match self {
            Self::All => true,
            Self::Chat(scoped) => *scoped == chat_id,
        }
    }
}

/// A member who has been challenged and has not yet been admitted or banned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMember {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub display_name: String,
    /// The bot's challenge message, edited on retry and deleted on resolution.
    pub prompt_message_id: MessageId,
    pub joined_at: DateTime<Utc>,
    /// Wrong answers consumed so far. Never exceeds the configured maximum.
    pub retry_count: u32,
    pub deadline: DateTime<Utc>,
}

impl PendingMember {
    /// Build a fresh record for a member who joined at `now`.
    pub fn new(
        chat_id: ChatId,
        user: &JoiningUser,
        prompt_message_id: MessageId,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        Self {
            user_id: user.id,
            chat_id,
            display_name: user.display_name.clone(),
            prompt_message_id,
            joined_at: now,
            retry_count: 0,
            deadline: now + timeout,
        }
    }

    pub fn key(&self) -> MemberKey {
        MemberKey {
            user_id: self.user_id,
            chat_id: self.chat_id,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }

    /// Attempts left before the next wrong answer bans the member.
    pub fn remaining_attempts(&self, max_retries: u32) -> u32 {
        max_retries.saturating_sub(self.retry_count)
    }

    /// Whether one more wrong answer still leaves the member pending.
    ///
    /// The comparison is strict: the wrong answer that brings the count to
    /// `max_retries` is the one that bans.
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count.saturating_add(1) < max_retries
    }

    /// Consume one attempt and restart the deadline from `now`.
    pub fn record_wrong_answer(&mut self, now: DateTime<Utc>, timeout: Duration) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.deadline = now + timeout;
    }
}
