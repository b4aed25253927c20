//! New-member admission control.
//!
//! A member who joins a guarded chat gets a challenge with a deadline and a
//! limited number of attempts. The design separates:
//! - **Record**: what the system knows (`PendingMember` in the repository)
//! - **Decision**: issuer, evaluator and sweep decide what should happen
//! - **Effects**: what to tell the chat platform (`Effect`)
//! - **Interpreter**: runs effects against the gateway
//!
//! The answer path and the sweep can race on the same member. The repository's
//! conditional delete decides which of them resolves it; see `executor`.

pub mod clock;
pub mod effect;
pub mod evaluator;
pub mod executor;
pub mod interpreter;
pub mod issuer;
pub mod repository;
pub mod sweep;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod scenarios;

pub use clock::{Clock, SystemClock};
pub use effect::{Action, Effect};
pub use evaluator::{AnswerEvaluator, EvaluateError, EvaluateOutcome};
pub use executor::{OutcomeExecutor, ResolveOutcome};
pub use issuer::{AdmitError, ChallengeIssuer};
pub use repository::{
    InMemoryRepository, MemberMutator, MemberRepository, RepositoryError, SqliteRepository,
};
pub use sweep::{SweepReport, SweepScheduler};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AdmissionConfig;
use crate::gateway::MessagingGateway;

/// Everything the admission components share.
pub struct AdmissionContext {
    pub repository: Arc<dyn MemberRepository>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub clock: Arc<dyn Clock>,
    pub config: AdmissionConfig,
    /// Process-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// The admission components wired to one context.
#[derive(Clone)]
pub struct Admission {
    pub issuer: ChallengeIssuer,
    pub evaluator: AnswerEvaluator,
    pub sweeper: SweepScheduler,
}

impl Admission {
    pub fn new(ctx: Arc<AdmissionContext>) -> Self {
        let executor = OutcomeExecutor::new(ctx.clone());
        Self {
            issuer: ChallengeIssuer::new(ctx.clone()),
            evaluator: AnswerEvaluator::new(ctx.clone(), executor.clone()),
            sweeper: SweepScheduler::new(ctx, executor),
        }
    }
}
