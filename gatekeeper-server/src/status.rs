//! Status types and handler for the status endpoint.
//!
//! Lists every member with an open challenge. Access needs the configured
//! bearer token; without one the endpoint is disabled.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use gatekeeper_core::{ChatScope, PendingMember};
use serde::Serialize;
use tracing::{error, warn};

use crate::webhook::tokens_match;
use crate::AppState;

#[derive(Debug, Default, Serialize)]
pub struct StatusSummary {
    pub total_pending: usize,
    /// Pending members per chat id.
    pub per_chat: BTreeMap<i64, usize>,
}

#[derive(Debug, Serialize)]
pub struct PendingEntry {
    pub chat_id: i64,
    pub user_id: i64,
    pub display_name: String,
    pub retry_count: u32,
    pub joined_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub pending: Vec<PendingEntry>,
}

impl StatusData {
    /// Build status data from records ordered by deadline.
    pub fn from_members(members: Vec<PendingMember>, version: String) -> Self {
        let mut summary = StatusSummary {
            total_pending: members.len(),
            ..Default::default()
        };

        let pending = members
            .into_iter()
            .map(|m| {
                *summary.per_chat.entry(m.chat_id.0).or_default() += 1;
                PendingEntry {
                    chat_id: m.chat_id.0,
                    user_id: m.user_id.0,
                    display_name: m.display_name,
                    retry_count: m.retry_count,
                    joined_at: m.joined_at,
                    deadline: m.deadline,
                }
            })
            .collect();

        Self {
            version,
            summary,
            pending,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let Some(expected) = state.status_auth_token.as_deref() else {
        return StatusCode::FORBIDDEN.into_response();
    };

    match bearer_token(&headers) {
        Some(provided) if tokens_match(expected, provided) => {}
        _ => {
            warn!("Rejected status request with missing or invalid token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match state.repository.list(ChatScope::All).await {
        Ok(members) => {
            Json(StatusData::from_members(members, crate::get_bot_version())).into_response()
        }
        Err(e) => {
            error!("Failed to list pending members: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
