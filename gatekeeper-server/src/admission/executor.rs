//! Terminal resolution of a pending member.
//!
//! Both the answer path and the sweep end a challenge through
//! `OutcomeExecutor::resolve`. The conditional delete in step 1 is the only
//! serialization point between them: the caller whose delete removed the row
//! performs the side effects, every other caller gets `LostRace` and does
//! nothing. Side effects never roll the claim back.

use std::sync::Arc;

use gatekeeper_core::{MessageId, PendingMember};
use tracing::{error, info, warn};

use super::effect::{resolution_effects, Action};
use super::interpreter::{execute_effects, EffectReport};
use super::AdmissionContext;

/// Whether this caller won the claim on a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Claimed,
    LostRace,
}

#[derive(Clone)]
pub struct OutcomeExecutor {
    ctx: Arc<AdmissionContext>,
}

impl OutcomeExecutor {
    pub fn new(ctx: Arc<AdmissionContext>) -> Self {
        Self { ctx }
    }

    /// Claim `member` and, if the claim succeeds, carry out `action`.
    ///
    /// `trigger` is the member's message that caused the resolution and is
    /// deleted along with the prompt.
    pub async fn resolve(
        &self,
        member: &PendingMember,
        action: Action,
        trigger: Option<MessageId>,
    ) -> ResolveOutcome {
        let key = member.key();

        // Step 1: claim. A storage failure means we did not delete the row,
        // so another caller (or the next sweep) still can.
        match self.ctx.repository.delete_if_present(&key).await {
            Ok(true) => {}
            Ok(false) => {
                info!(chat = %key.chat_id, user = %key.user_id, %action, "Lost claim race, skipping");
                return ResolveOutcome::LostRace;
            }
            Err(e) => {
                error!(
                    chat = %key.chat_id,
                    user = %key.user_id,
                    %action,
                    "Failed to claim pending member: {}",
                    e
                );
                return ResolveOutcome::LostRace;
            }
        }

        info!(
            chat = %key.chat_id,
            user = %key.user_id,
            %action,
            retries = member.retry_count,
            "Claimed pending member"
        );

        // Step 2: side effects
        let effects = resolution_effects(
            member,
            action,
            trigger,
            &self.ctx.config,
            self.ctx.clock.now(),
        );
        let action_label = action.to_string();
        let run = execute_effects(self.ctx.gateway.as_ref(), &key, &action_label, effects);
        tokio::pin!(run);

        // The record is already gone and cannot be claimed again, so on
        // shutdown the effects get a grace window instead of being dropped.
        let report: Option<EffectReport> = tokio::select! {
            biased;
            report = &mut run => Some(report),
            _ = self.ctx.shutdown.cancelled() => {
                tokio::time::timeout(self.ctx.config.shutdown_grace, &mut run).await.ok()
            }
        };

        match report {
            Some(report) if report.all_succeeded() => {
                info!(chat = %key.chat_id, user = %key.user_id, %action, "Resolution complete");
            }
            Some(report) => {
                // The member is no longer tracked even if e.g. the ban failed.
                warn!(
                    chat = %key.chat_id,
                    user = %key.user_id,
                    %action,
                    failed = report.failed.len(),
                    "Resolution completed with gateway failures"
                );
            }
            None => {
                warn!(
                    chat = %key.chat_id,
                    user = %key.user_id,
                    %action,
                    "Shutdown grace elapsed, abandoning remaining side effects"
                );
            }
        }

        ResolveOutcome::Claimed
    }
}
