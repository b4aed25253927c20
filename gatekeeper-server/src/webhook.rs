//! Telegram webhook receiver.
//!
//! Telegram echoes the secret configured with `setWebhook` in the
//! `X-Telegram-Bot-Api-Secret-Token` header of every update. Requests without
//! the right secret never reach the handler. Accepted updates are classified
//! into joins and member messages and processed in a spawned task so the
//! webhook answers before any gateway call is made.

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Extension, Router,
};
use gatekeeper_core::{ChatId, JoiningUser, MessageId, MessageKind, UserId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::admission::{AdmitError, EvaluateOutcome};
use crate::{AppState, CorrelationId};

pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
    pub text: Option<String>,
    pub sticker: Option<serde_json::Value>,
    pub new_chat_members: Option<Vec<TelegramUser>>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl TelegramUser {
    pub fn display_name(&self) -> String {
        let full = match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        };
        if full.trim().is_empty() {
            if let Some(username) = &self.username {
                return format!("@{}", username);
            }
        }
        full
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
}

/// What an update asks the admission flow to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    Join {
        chat_id: ChatId,
        members: Vec<JoiningUser>,
    },
    Message {
        chat_id: ChatId,
        user_id: UserId,
        message_id: MessageId,
        kind: MessageKind,
    },
    Ignore,
}

/// Map an update to an admission action. Only chats in `guarded` are handled.
pub fn classify_update(update: &Update, guarded: &[ChatId]) -> UpdateAction {
    let Some(message) = &update.message else {
        return UpdateAction::Ignore;
    };
    let chat_id = ChatId(message.chat.id);
    if !guarded.contains(&chat_id) {
        return UpdateAction::Ignore;
    }

    if let Some(joined) = &message.new_chat_members {
        let members: Vec<JoiningUser> = joined
            .iter()
            .filter(|u| !u.is_bot)
            .map(|u| JoiningUser {
                id: UserId(u.id),
                display_name: u.display_name(),
            })
            .collect();
        if members.is_empty() {
            return UpdateAction::Ignore;
        }
        return UpdateAction::Join { chat_id, members };
    }

    let Some(from) = &message.from else {
        return UpdateAction::Ignore;
    };
    if from.is_bot {
        return UpdateAction::Ignore;
    }

    let kind = if let Some(text) = &message.text {
        MessageKind::Text(text.clone())
    } else if message.sticker.is_some() {
        MessageKind::Sticker
    } else {
        MessageKind::Other
    };

    UpdateAction::Message {
        chat_id,
        user_id: UserId(from.id),
        message_id: MessageId(message.message_id),
        kind,
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Constant-time comparison of a presented token against the expected one.
///
/// Both sides are MACed under the expected token first, so neither the
/// contents nor the length of the expected token leak through timing.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    let Ok(mut expected_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(provided.as_bytes());
    mac.verify_slice(&expected_tag).is_ok()
}

async fn verify_secret_token(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get(SECRET_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !tokens_match(&state.webhook_secret, provided) {
        error!("Invalid webhook secret token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    request
        .extensions_mut()
        .insert(CorrelationId(Uuid::new_v4().to_string()));

    Ok(next.run(request).await)
}

pub async fn telegram_webhook_handler(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let update: Update = serde_json::from_slice(&body).map_err(|e| {
        warn!("Malformed update: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    let correlation_id = correlation_id.0;
    debug!(update_id = update.update_id, %correlation_id, "Received update");

    let action = classify_update(&update, &state.guarded_chats);
    if action != UpdateAction::Ignore {
        let span = info_span!("update", update_id = update.update_id, %correlation_id);
        state
            .tasks
            .spawn(process_action(state.clone(), action).instrument(span));
    }

    Ok(Json(WebhookResponse { ok: true }))
}

async fn process_action(state: Arc<AppState>, action: UpdateAction) {
    match action {
        UpdateAction::Join { chat_id, members } => {
            for user in members {
                match state.admission.issuer.admit(chat_id, &user).await {
                    Ok(_) => {}
                    Err(AdmitError::AlreadyPending(_)) => {}
                    Err(e) => {
                        error!(chat = %chat_id, user = %user.id, "Failed to challenge new member: {}", e);
                    }
                }
            }
        }
        UpdateAction::Message {
            chat_id,
            user_id,
            message_id,
            kind,
        } => {
            match state
                .admission
                .evaluator
                .evaluate(chat_id, user_id, message_id, &kind)
                .await
            {
                Ok(EvaluateOutcome::NotApplicable) => {}
                Ok(outcome) => {
                    info!(chat = %chat_id, user = %user_id, ?outcome, "Answer evaluated");
                }
                Err(e) => {
                    error!(chat = %chat_id, user = %user_id, "Failed to evaluate answer: {}", e);
                }
            }
        }
        UpdateAction::Ignore => {}
    }
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(telegram_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_secret_token,
        ))
}
