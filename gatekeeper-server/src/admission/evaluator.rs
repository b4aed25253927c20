//! Answer evaluation for messages posted by pending members.

use std::sync::Arc;

use gatekeeper_core::{
    matches_answer, ChatId, MemberKey, MessageId, MessageKind, PendingMember, UserId,
};
use tracing::{debug, info};

use super::effect::{retry_effects, Action};
use super::executor::{OutcomeExecutor, ResolveOutcome};
use super::interpreter::execute_effects;
use super::repository::RepositoryError;
use super::AdmissionContext;

/// What a message did to its author's challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateOutcome {
    /// The author is not pending here, or another path resolved them first.
    NotApplicable,
    Passed,
    Retried,
    Banned,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluateError {
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

#[derive(Clone)]
pub struct AnswerEvaluator {
    ctx: Arc<AdmissionContext>,
    executor: OutcomeExecutor,
}

impl AnswerEvaluator {
    pub fn new(ctx: Arc<AdmissionContext>, executor: OutcomeExecutor) -> Self {
        Self { ctx, executor }
    }

    /// Judge `message` (id `message_id`) from `user_id` in `chat_id`.
    pub async fn evaluate(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        message_id: MessageId,
        message: &MessageKind,
    ) -> Result<EvaluateOutcome, EvaluateError> {
        let key = MemberKey { user_id, chat_id };
        let Some(member) = self.ctx.repository.get(&key).await? else {
            return Ok(EvaluateOutcome::NotApplicable);
        };

        let config = &self.ctx.config;

        if matches_answer(message, &config.expected_answer) {
            info!(chat = %chat_id, user = %user_id, "Correct answer");
            let outcome = self
                .executor
                .resolve(&member, Action::Admit, Some(message_id))
                .await;
            return Ok(match outcome {
                ResolveOutcome::Claimed => EvaluateOutcome::Passed,
                ResolveOutcome::LostRace => EvaluateOutcome::NotApplicable,
            });
        }

        debug!(
            chat = %chat_id,
            user = %user_id,
            kind = message.label(),
            retries = member.retry_count,
            "Wrong answer"
        );

        if !member.can_retry(config.max_retries) {
            return Ok(self.ban(&member, message_id).await);
        }

        let now = self.ctx.clock.now();
        let timeout = config.challenge_timeout;
        let max_retries = config.max_retries;
        let updated = self
            .ctx
            .repository
            .update_if_present(
                &key,
                Box::new(move |m: &mut PendingMember| {
                    // A concurrent wrong answer may already have used the last attempt
                    if m.retry_count < max_retries {
                        m.record_wrong_answer(now, timeout);
                    }
                }),
            )
            .await?;

        let Some(updated) = updated else {
            info!(chat = %chat_id, user = %user_id, "Member resolved before retry was recorded");
            return Ok(EvaluateOutcome::NotApplicable);
        };

        if updated.retry_count >= max_retries {
            return Ok(self.ban(&updated, message_id).await);
        }

        info!(
            chat = %chat_id,
            user = %user_id,
            retries = updated.retry_count,
            deadline = %updated.deadline,
            "Retry recorded"
        );
        let effects = retry_effects(&updated, message_id, config);
        execute_effects(self.ctx.gateway.as_ref(), &key, "retry", effects).await;

        Ok(EvaluateOutcome::Retried)
    }

    async fn ban(&self, member: &PendingMember, trigger: MessageId) -> EvaluateOutcome {
        info!(
            chat = %member.chat_id,
            user = %member.user_id,
            retries = member.retry_count,
            "Retries exhausted"
        );
        match self
            .executor
            .resolve(member, Action::Ban, Some(trigger))
            .await
        {
            ResolveOutcome::Claimed => EvaluateOutcome::Banned,
            ResolveOutcome::LostRace => EvaluateOutcome::NotApplicable,
        }
    }
}
