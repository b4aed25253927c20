pub mod admission;
pub mod config;
pub mod gateway;
pub mod status;
pub mod webhook;

use std::sync::Arc;

use gatekeeper_core::ChatId;
use tokio_util::task::TaskTracker;

use crate::admission::{Admission, MemberRepository};

pub use gatekeeper_core::get_bot_version;

/// Per-request id carried from the webhook middleware into spawned work.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

pub struct AppState {
    pub admission: Admission,
    pub repository: Arc<dyn MemberRepository>,
    pub webhook_secret: String,
    pub status_auth_token: Option<String>,
    pub guarded_chats: Vec<ChatId>,
    /// Update processing spawned by the webhook; drained on shutdown so a
    /// claimed resolution finishes its side effects.
    pub tasks: TaskTracker,
}
