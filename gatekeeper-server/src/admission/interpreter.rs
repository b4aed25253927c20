//! Effect interpreter that executes effects against the messaging gateway.
//!
//! Effects run in order. A failed effect is logged with the member and action
//! it belongs to and execution continues; nothing here can undo a store
//! transition that has already been committed.

use gatekeeper_core::MemberKey;
use tracing::{debug, error};

use super::effect::Effect;
use crate::gateway::{GatewayError, MessagingGateway};

/// Outcome of running a list of effects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectReport {
    pub succeeded: usize,
    pub failed: Vec<(&'static str, GatewayError)>,
}

impl EffectReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Execute effects for one member, logging (not propagating) gateway failures.
pub async fn execute_effects(
    gateway: &dyn MessagingGateway,
    key: &MemberKey,
    action: &str,
    effects: Vec<Effect>,
) -> EffectReport {
    let mut report = EffectReport::default();

    for effect in effects {
        let name = effect.name();
        match execute_effect(gateway, effect).await {
            Ok(()) => {
                debug!(chat = %key.chat_id, user = %key.user_id, action, effect = name, "Effect done");
                report.succeeded += 1;
            }
            Err(e) => {
                error!(
                    chat = %key.chat_id,
                    user = %key.user_id,
                    action,
                    effect = name,
                    "Effect execution failed: {}",
                    e
                );
                report.failed.push((name, e));
            }
        }
    }

    report
}

async fn execute_effect(gateway: &dyn MessagingGateway, effect: Effect) -> Result<(), GatewayError> {
    match effect {
        Effect::SendMessage { chat_id, text } => {
            gateway.send_message(chat_id, &text).await.map(|_| ())
        }
        Effect::EditMessage {
            chat_id,
            message_id,
            text,
        } => gateway.edit_message(chat_id, message_id, &text).await,
        Effect::DeleteMessages {
            chat_id,
            message_ids,
        } => {
            if message_ids.is_empty() {
                return Ok(());
            }
            gateway.delete_messages(chat_id, &message_ids).await
        }
        Effect::BanMember {
            chat_id,
            user_id,
            until,
        } => gateway.ban_member(chat_id, user_id, until).await,
    }
}
