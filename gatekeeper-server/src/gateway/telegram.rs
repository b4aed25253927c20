//! Telegram Bot API implementation of `MessagingGateway`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::{ChatId, MessageId, UserId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{GatewayError, MessagingGateway};

/// Per-request timeout for Bot API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram caps `deleteMessages` at this many ids per call.
const MAX_DELETE_BATCH: usize = 100;

#[derive(Clone)]
pub struct TelegramGateway {
    client: Client,
    api_url: String,
    bot_token: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct DeleteMessagesRequest<'a> {
    chat_id: i64,
    message_ids: &'a [i64],
}

#[derive(Debug, Serialize)]
struct BanChatMemberRequest {
    chat_id: i64,
    user_id: i64,
    until_date: i64,
    revoke_messages: bool,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl TelegramGateway {
    pub fn new(api_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    async fn call<B, T>(&self, operation: &'static str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(operation, "Calling Telegram Bot API");

        let response = self
            .client
            .post(self.method_url(operation))
            .json(body)
            .send()
            .await
            // Strip the URL: it embeds the bot token
            .map_err(|e| GatewayError::transport(operation, e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::transport(operation, e.without_url().to_string()))?;

        let result = parse_response(operation, &text);
        if let Err(ref e) = result {
            error!(operation, %status, "Telegram API error: {}", e);
        }
        result
    }
}

/// Decode a Bot API envelope into its result.
fn parse_response<T: DeserializeOwned>(
    operation: &'static str,
    body: &str,
) -> Result<T, GatewayError> {
    let envelope: ApiResponse<T> = serde_json::from_str(body)
        .map_err(|e| GatewayError::transport(operation, format!("invalid response body: {}", e)))?;

    if !envelope.ok {
        return Err(GatewayError::rejected(
            operation,
            envelope
                .description
                .unwrap_or_else(|| "no description".to_string()),
        ));
    }

    envelope
        .result
        .ok_or_else(|| GatewayError::transport(operation, "response is missing result"))
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, GatewayError> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                &SendMessageRequest {
                    chat_id: chat_id.0,
                    text,
                },
            )
            .await?;
        Ok(MessageId(sent.message_id))
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), GatewayError> {
        // editMessageText answers with the edited message; we only need success
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &EditMessageTextRequest {
                    chat_id: chat_id.0,
                    message_id: message_id.0,
                    text,
                },
            )
            .await?;
        Ok(())
    }

    async fn delete_messages(
        &self,
        chat_id: ChatId,
        message_ids: &[MessageId],
    ) -> Result<(), GatewayError> {
        let ids: Vec<i64> = message_ids.iter().map(|id| id.0).collect();
        let mut first_error = None;

        // Ids the platform cannot delete are skipped server-side, so one stale
        // id does not fail the rest of the batch.
        for chunk in ids.chunks(MAX_DELETE_BATCH) {
            let result: Result<bool, GatewayError> = self
                .call(
                    "deleteMessages",
                    &DeleteMessagesRequest {
                        chat_id: chat_id.0,
                        message_ids: chunk,
                    },
                )
                .await;
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn ban_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let _: bool = self
            .call(
                "banChatMember",
                &BanChatMemberRequest {
                    chat_id: chat_id.0,
                    user_id: user_id.0,
                    until_date: until.timestamp(),
                    revoke_messages: false,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_parse_response_ok() {
        let sent: SentMessage =
            parse_response("sendMessage", r#"{"ok":true,"result":{"message_id":42}}"#).unwrap();
        assert_eq!(sent.message_id, 42);
    }

    #[test]
    fn test_parse_response_rejected_keeps_description() {
        let err = parse_response::<bool>(
            "banChatMember",
            r#"{"ok":false,"error_code":400,"description":"Bad Request: not enough rights"}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            GatewayError::rejected("banChatMember", "Bad Request: not enough rights")
        );
    }

    #[test]
    fn test_parse_response_garbage_is_transport_error() {
        let err = parse_response::<bool>("deleteMessages", "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
    }

    #[test]
    fn test_method_url_has_no_double_slash() {
        let gateway = TelegramGateway::new("https://api.telegram.org/", "123:abc");
        assert_eq!(
            gateway.method_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[tokio::test]
    async fn test_send_message_returns_platform_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/sendMessage");
                then.status(200)
                    .json_body(json!({"ok": true, "result": {"message_id": 777}}));
            })
            .await;

        let gateway = TelegramGateway::new(server.base_url(), "TOKEN");
        let id = gateway.send_message(ChatId(-100), "hello").await.unwrap();

        mock.assert_async().await;
        assert_eq!(id, MessageId(777));
    }

    #[tokio::test]
    async fn test_ban_member_surfaces_rejection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/banChatMember");
                then.status(400).json_body(json!({
                    "ok": false,
                    "error_code": 400,
                    "description": "Bad Request: not enough rights to restrict/unrestrict chat member"
                }));
            })
            .await;

        let gateway = TelegramGateway::new(server.base_url(), "TOKEN");
        let until = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let err = gateway
            .ban_member(ChatId(-100), UserId(7), until)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::Rejected {
                operation: "banChatMember",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_delete_messages_with_no_ids_makes_no_call() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/deleteMessages");
                then.status(200).json_body(json!({"ok": true, "result": true}));
            })
            .await;

        let gateway = TelegramGateway::new(server.base_url(), "TOKEN");
        gateway.delete_messages(ChatId(-100), &[]).await.unwrap();

        mock.assert_hits_async(0).await;
    }
}
