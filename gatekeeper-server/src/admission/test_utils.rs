//! Shared fixtures for admission tests: a manual clock, a recording gateway
//! and a harness that wires them to an in-memory repository.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use gatekeeper_core::{ChatId, JoiningUser, MessageId, PendingMember, UserId};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{
    Admission, AdmissionContext, AnswerEvaluator, ChallengeIssuer, Clock, InMemoryRepository,
    OutcomeExecutor, SweepScheduler,
};
use crate::config::AdmissionConfig;
use crate::gateway::{GatewayError, MessagingGateway};
use crate::AppState;

pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const TEST_STATUS_TOKEN: &str = "test-status-token";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn joining_user(id: i64) -> JoiningUser {
    JoiningUser {
        id: UserId(id),
        display_name: format!("User{}", id),
    }
}

/// A member challenged at `joined_at` with the default 60s timeout.
pub fn pending_member(user: i64, chat: i64, joined_at: DateTime<Utc>) -> PendingMember {
    PendingMember::new(
        ChatId(chat),
        &joining_user(user),
        MessageId(1000 + user),
        joined_at,
        chrono::Duration::seconds(60),
    )
}

pub fn test_config() -> AdmissionConfig {
    AdmissionConfig {
        expected_answer: "дружба".to_string(),
        ..AdmissionConfig::default()
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Send {
        chat_id: ChatId,
        text: String,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    Delete {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
    },
    Ban {
        chat_id: ChatId,
        user_id: UserId,
        until: DateTime<Utc>,
    },
}

#[derive(Default)]
struct Failures {
    sends: bool,
    edits: bool,
    deletes: bool,
    bans: bool,
}

/// Gateway fake that records every call before applying the configured
/// delay or failure.
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    sent_ids: Mutex<Vec<MessageId>>,
    next_id: Mutex<i64>,
    failures: Mutex<Failures>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            sent_ids: Mutex::new(Vec::new()),
            next_id: Mutex::new(5000),
            failures: Mutex::new(Failures::default()),
            delay: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Ids handed out for successful sends, in order.
    pub fn sent_ids(&self) -> Vec<MessageId> {
        self.sent_ids.lock().unwrap().clone()
    }

    pub fn last_sent_id(&self) -> Option<MessageId> {
        self.sent_ids.lock().unwrap().last().copied()
    }

    pub fn deleted_ids(&self) -> Vec<MessageId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::Delete { message_ids, .. } => Some(message_ids),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn bans(&self) -> Vec<(ChatId, UserId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::Ban {
                    chat_id, user_id, ..
                } => Some((chat_id, user_id)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.failures.lock().unwrap().sends = fail;
    }

    pub fn fail_edits(&self, fail: bool) {
        self.failures.lock().unwrap().edits = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.failures.lock().unwrap().deletes = fail;
    }

    pub fn fail_bans(&self, fail: bool) {
        self.failures.lock().unwrap().bans = fail;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    async fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, GatewayError> {
        self.record(GatewayCall::Send {
            chat_id,
            text: text.to_string(),
        })
        .await;
        if self.failures.lock().unwrap().sends {
            return Err(GatewayError::transport("sendMessage", "injected failure"));
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            MessageId(*next)
        };
        self.sent_ids.lock().unwrap().push(id);
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        })
        .await;
        if self.failures.lock().unwrap().edits {
            return Err(GatewayError::rejected(
                "editMessageText",
                "message to edit not found",
            ));
        }
        Ok(())
    }

    async fn delete_messages(
        &self,
        chat_id: ChatId,
        message_ids: &[MessageId],
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Delete {
            chat_id,
            message_ids: message_ids.to_vec(),
        })
        .await;
        if self.failures.lock().unwrap().deletes {
            return Err(GatewayError::transport("deleteMessages", "injected failure"));
        }
        Ok(())
    }

    async fn ban_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Ban {
            chat_id,
            user_id,
            until,
        })
        .await;
        if self.failures.lock().unwrap().bans {
            return Err(GatewayError::rejected(
                "banChatMember",
                "not enough rights to restrict/unrestrict chat member",
            ));
        }
        Ok(())
    }
}

/// Admission components over an in-memory repository, a recording gateway
/// and a manual clock starting at `t0()`.
pub struct Harness {
    pub repo: Arc<InMemoryRepository>,
    pub gateway: Arc<RecordingGateway>,
    pub clock: Arc<ManualClock>,
    pub ctx: Arc<AdmissionContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AdmissionConfig) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let gateway = Arc::new(RecordingGateway::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let ctx = Arc::new(AdmissionContext {
            repository: repo.clone(),
            gateway: gateway.clone(),
            clock: clock.clone(),
            config,
            shutdown: CancellationToken::new(),
        });
        Self {
            repo,
            gateway,
            clock,
            ctx,
        }
    }

    pub fn executor(&self) -> OutcomeExecutor {
        OutcomeExecutor::new(self.ctx.clone())
    }

    pub fn issuer(&self) -> ChallengeIssuer {
        ChallengeIssuer::new(self.ctx.clone())
    }

    pub fn evaluator(&self) -> AnswerEvaluator {
        AnswerEvaluator::new(self.ctx.clone(), self.executor())
    }

    pub fn sweeper(&self) -> SweepScheduler {
        SweepScheduler::new(self.ctx.clone(), self.executor())
    }

    /// HTTP state guarding chat 100 over this harness.
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            admission: Admission::new(self.ctx.clone()),
            repository: self.ctx.repository.clone(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            status_auth_token: Some(TEST_STATUS_TOKEN.to_string()),
            guarded_chats: vec![ChatId(100)],
            tasks: TaskTracker::new(),
        })
    }
}
