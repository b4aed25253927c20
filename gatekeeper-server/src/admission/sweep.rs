//! Periodic sweep that bans members whose deadline has passed.
//!
//! The sweep keeps no state of its own. Each tick asks the repository for
//! expired records and resolves all of them with `Ban` concurrently; members
//! already resolved by the answer path simply lose the claim.

use std::sync::Arc;

use futures_util::future::join_all;
use gatekeeper_core::ChatScope;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::effect::Action;
use super::executor::{OutcomeExecutor, ResolveOutcome};
use super::repository::RepositoryError;
use super::AdmissionContext;

/// Result of one sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub banned: usize,
    pub lost_race: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0
    }
}

#[derive(Clone)]
pub struct SweepScheduler {
    ctx: Arc<AdmissionContext>,
    executor: OutcomeExecutor,
}

impl SweepScheduler {
    pub fn new(ctx: Arc<AdmissionContext>, executor: OutcomeExecutor) -> Self {
        Self { ctx, executor }
    }

    /// Run ticks every `sweep_interval` until the shutdown token fires.
    ///
    /// A slow tick pushes the next one back; ticks never overlap.
    pub async fn run(&self) {
        let mut ticker = interval(self.ctx.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.ctx.config.sweep_interval.as_secs(),
            "Sweep started"
        );

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep_once().await {
                Ok(report) if !report.is_empty() => {
                    info!(
                        expired = report.expired,
                        banned = report.banned,
                        lost_race = report.lost_race,
                        "Sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Sweep failed: {}", e),
            }
        }

        info!("Sweep stopped");
    }

    /// One pass: ban every member whose deadline is at or before now.
    pub async fn sweep_once(&self) -> Result<SweepReport, RepositoryError> {
        let now = self.ctx.clock.now();
        let expired = self
            .ctx
            .repository
            .find_expired(ChatScope::All, now)
            .await?;

        let outcomes = join_all(
            expired
                .iter()
                .map(|member| self.executor.resolve(member, Action::Ban, None)),
        )
        .await;

        let banned = outcomes
            .iter()
            .filter(|o| **o == ResolveOutcome::Claimed)
            .count();

        Ok(SweepReport {
            expired: expired.len(),
            banned,
            lost_race: outcomes.len() - banned,
        })
    }
}
