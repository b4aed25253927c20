//! Challenge issuing on join.

use std::sync::Arc;

use gatekeeper_core::{ChatId, JoiningUser, MemberKey, MessageId, PendingMember};
use tracing::{info, warn};

use super::effect::prompt_text;
use super::repository::RepositoryError;
use super::AdmissionContext;
use crate::gateway::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    /// The member already has an open challenge in this chat.
    #[error("{0} already has a pending challenge")]
    AlreadyPending(MemberKey),
    /// The prompt could not be sent; no record was created.
    #[error("failed to send challenge prompt: {0}")]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

#[derive(Clone)]
pub struct ChallengeIssuer {
    ctx: Arc<AdmissionContext>,
}

impl ChallengeIssuer {
    pub fn new(ctx: Arc<AdmissionContext>) -> Self {
        Self { ctx }
    }

    /// Challenge a member who just joined `chat_id`.
    ///
    /// Sends the prompt first and only records the member once the prompt
    /// exists, so a failed send leaves nothing behind for the sweep to ban.
    pub async fn admit(
        &self,
        chat_id: ChatId,
        user: &JoiningUser,
    ) -> Result<PendingMember, AdmitError> {
        let key = MemberKey {
            user_id: user.id,
            chat_id,
        };

        if self.ctx.repository.get(&key).await?.is_some() {
            info!(chat = %chat_id, user = %user.id, "Member already challenged, ignoring join");
            return Err(AdmitError::AlreadyPending(key));
        }

        let now = self.ctx.clock.now();
        let timeout = self.ctx.config.challenge_timeout;

        // The prompt id is filled in once the platform has assigned one
        let mut member = PendingMember::new(chat_id, user, MessageId(0), now, timeout);
        let text = prompt_text(&member, &self.ctx.config);

        member.prompt_message_id = self.ctx.gateway.send_message(chat_id, &text).await?;

        match self.ctx.repository.insert_if_absent(&member).await {
            Ok(true) => {
                info!(
                    chat = %chat_id,
                    user = %user.id,
                    deadline = %member.deadline,
                    "Challenge issued"
                );
                Ok(member)
            }
            Ok(false) => {
                // A concurrent join for the same key recorded its own prompt first
                self.discard_prompt(&member).await;
                Err(AdmitError::AlreadyPending(key))
            }
            Err(e) => {
                self.discard_prompt(&member).await;
                Err(e.into())
            }
        }
    }

    async fn discard_prompt(&self, member: &PendingMember) {
        if let Err(e) = self
            .ctx
            .gateway
            .delete_messages(member.chat_id, &[member.prompt_message_id])
            .await
        {
            warn!(
                chat = %member.chat_id,
                user = %member.user_id,
                "Failed to delete unused challenge prompt: {}",
                e
            );
        }
    }
}
