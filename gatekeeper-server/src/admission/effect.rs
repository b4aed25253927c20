//! Effects (side effects as data).
//!
//! Resolving or retrying a member produces a list of effects describing the
//! gateway calls to make. They are pure data, so the decision of what to do
//! is testable without a gateway; the interpreter executes them.

use chrono::{DateTime, Utc};
use gatekeeper_core::{ChatId, MessageId, PendingMember, TemplateVars, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::AdmissionConfig;

/// Terminal action for a pending member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Admit,
    Ban,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admit => write!(f, "admit"),
            Self::Ban => write!(f, "ban"),
        }
    }
}

/// A single gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    SendMessage {
        chat_id: ChatId,
        text: String,
    },
    EditMessage {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    DeleteMessages {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
    },
    BanMember {
        chat_id: ChatId,
        user_id: UserId,
        until: DateTime<Utc>,
    },
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessages { .. } => "delete_messages",
            Self::BanMember { .. } => "ban_member",
        }
    }
}

fn template_vars<'a>(
    member: &'a PendingMember,
    config: &'a AdmissionConfig,
) -> TemplateVars<'a> {
    TemplateVars {
        name: &member.display_name,
        answer: &config.expected_answer,
        timeout_secs: config.challenge_timeout.num_seconds(),
        attempts_left: member.remaining_attempts(config.max_retries),
    }
}

/// Text of the challenge prompt for a freshly joined member.
pub fn prompt_text(member: &PendingMember, config: &AdmissionConfig) -> String {
    config
        .templates
        .render_prompt(&template_vars(member, config))
}

/// Effects for a claimed member.
///
/// `trigger` is the member's own message that caused the resolution, if any;
/// the sweep has none.
pub fn resolution_effects(
    member: &PendingMember,
    action: Action,
    trigger: Option<MessageId>,
    config: &AdmissionConfig,
    now: DateTime<Utc>,
) -> Vec<Effect> {
    let mut message_ids = vec![member.prompt_message_id];
    message_ids.extend(trigger);

    let mut effects = vec![Effect::DeleteMessages {
        chat_id: member.chat_id,
        message_ids,
    }];

    let vars = template_vars(member, config);
    match action {
        Action::Admit => {
            effects.push(Effect::SendMessage {
                chat_id: member.chat_id,
                text: config.templates.render_welcome(&vars),
            });
        }
        Action::Ban => {
            effects.push(Effect::BanMember {
                chat_id: member.chat_id,
                user_id: member.user_id,
                until: now + config.ban_duration,
            });
            if let Some(text) = config.templates.render_ban(&vars) {
                effects.push(Effect::SendMessage {
                    chat_id: member.chat_id,
                    text,
                });
            }
        }
    }

    effects
}

/// Effects after a wrong answer that left the member pending.
///
/// `member` is the record as updated by the store.
pub fn retry_effects(
    member: &PendingMember,
    wrong_answer: MessageId,
    config: &AdmissionConfig,
) -> Vec<Effect> {
    vec![
        Effect::EditMessage {
            chat_id: member.chat_id,
            message_id: member.prompt_message_id,
            text: config.templates.render_retry(&template_vars(member, config)),
        },
        Effect::DeleteMessages {
            chat_id: member.chat_id,
            message_ids: vec![wrong_answer],
        },
    ]
}
