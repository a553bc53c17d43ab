//! Telegram Bot API client.
//!
//! `BotApi` is the seam between handlers and Telegram: production code talks
//! to `TelegramClient` (JSON over HTTPS via reqwest), tests use a recording
//! double. Only the methods the bot actually calls are exposed.

use crate::models::telegram::{
    ApiResponse, BotCommand, BotCommandScope, ForumTopic, InlineKeyboardMarkup, Message,
    MessageId, Update,
};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Retries per call when Telegram answers 429 with `retry_after`.
const MAX_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram api error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("`{0}` returned ok without a result")]
    EmptyResult(&'static str),
}

impl TelegramError {
    #[cfg(test)]
    pub fn api(code: u16, description: impl Into<String>) -> Self {
        Self::Api {
            code,
            description: description.into(),
            retry_after: None,
        }
    }

    /// Wait requested by Telegram's flood control, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api {
                retry_after: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// The forum topic referenced by the request was deleted.
    pub fn is_thread_not_found(&self) -> bool {
        match self {
            Self::Api { description, .. } => description
                .to_ascii_lowercase()
                .contains("message thread not found"),
            _ => false,
        }
    }

    /// The recipient blocked the bot or deleted their account.
    pub fn is_blocked_by_user(&self) -> bool {
        match self {
            Self::Api { code, description, .. } => {
                let description = description.to_ascii_lowercase();
                *code == 403
                    || description.contains("bot was blocked")
                    || description.contains("user is deactivated")
            }
            _ => false,
        }
    }
}

pub type TelegramResult<T> = Result<T, TelegramError>;

/// Parameters of `sendMessage`. Text is always sent as HTML.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    pub parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

impl SendMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            message_thread_id: None,
            parse_mode: "HTML",
            reply_markup: None,
        }
    }

    pub fn in_thread(mut self, thread_id: i64) -> Self {
        self.message_thread_id = Some(thread_id);
        self
    }

    pub fn with_keyboard(mut self, markup: InlineKeyboardMarkup) -> Self {
        self.reply_markup = Some(markup);
        self
    }
}

#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u32,
        allowed_updates: &[&str],
    ) -> TelegramResult<Vec<Update>>;

    async fn delete_webhook(&self) -> TelegramResult<()>;

    async fn send_message(&self, req: SendMessage) -> TelegramResult<Message>;

    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        message_thread_id: Option<i64>,
    ) -> TelegramResult<MessageId>;

    async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
        icon_custom_emoji_id: Option<&str>,
    ) -> TelegramResult<ForumTopic>;

    async fn pin_chat_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()>;

    async fn unpin_chat_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()>;

    async fn answer_callback_query(&self, id: &str, text: Option<&str>) -> TelegramResult<()>;

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str)
    -> TelegramResult<()>;

    async fn set_my_commands(
        &self,
        commands: &[BotCommand],
        scope: &BotCommandScope,
        language_code: Option<&str>,
    ) -> TelegramResult<()>;

    async fn delete_my_commands(
        &self,
        scope: &BotCommandScope,
        language_code: Option<&str>,
    ) -> TelegramResult<()>;
}

/// reqwest-backed [`BotApi`].
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(base: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/bot{}", base.trim_end_matches('/'), token),
        }
    }

    /// POST `params` to `method` and unwrap the `{ok, result}` envelope.
    async fn call<P, R>(&self, method: &'static str, params: &P, timeout: Duration) -> TelegramResult<R>
    where
        P: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", self.base_url, method);
        let mut retries = 0;

        loop {
            // Errors carry the URL, which embeds the token.
            let response = self
                .client
                .post(&url)
                .timeout(timeout)
                .json(params)
                .send()
                .await
                .map_err(reqwest::Error::without_url)?;
            let body: ApiResponse<R> = response.json().await.map_err(reqwest::Error::without_url)?;

            if body.ok {
                return body.result.ok_or(TelegramError::EmptyResult(method));
            }

            let code = body.error_code.unwrap_or_default();
            let retry_after = body.parameters.and_then(|p| p.retry_after);
            if code == 429 && retries < MAX_RETRIES {
                if let Some(secs) = retry_after {
                    retries += 1;
                    warn!("{} throttled, retrying in {}s (retry {})", method, secs, retries);
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    continue;
                }
            }

            debug!("{} failed: {} {:?}", method, code, body.description);
            return Err(TelegramError::Api {
                code,
                description: body.description.unwrap_or_default(),
                retry_after,
            });
        }
    }

    async fn call_true<P>(&self, method: &'static str, params: &P) -> TelegramResult<()>
    where
        P: Serialize + ?Sized + Sync,
    {
        let _: Value = self.call(method, params, REQUEST_TIMEOUT).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u32,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct CopyMessage {
    chat_id: i64,
    from_chat_id: i64,
    message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
}

#[derive(Serialize)]
struct CreateForumTopic<'a> {
    chat_id: i64,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_custom_emoji_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ChatMessage {
    chat_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct PinChatMessage {
    chat_id: i64,
    message_id: i64,
    disable_notification: bool,
}

#[derive(Serialize)]
struct AnswerCallbackQuery<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Serialize)]
struct EditMessageText<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Serialize)]
struct SetMyCommands<'a> {
    commands: &'a [BotCommand],
    scope: &'a BotCommandScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteMyCommands<'a> {
    scope: &'a BotCommandScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<&'a str>,
}

#[async_trait]
impl BotApi for TelegramClient {
    async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u32,
        allowed_updates: &[&str],
    ) -> TelegramResult<Vec<Update>> {
        let params = GetUpdates {
            offset,
            timeout: timeout_secs,
            allowed_updates,
        };
        // Leave headroom over the server-side long-poll timeout.
        let timeout = Duration::from_secs(u64::from(timeout_secs) + 10);
        self.call("getUpdates", &params, timeout).await
    }

    async fn delete_webhook(&self) -> TelegramResult<()> {
        self.call_true("deleteWebhook", &serde_json::json!({})).await
    }

    async fn send_message(&self, req: SendMessage) -> TelegramResult<Message> {
        self.call("sendMessage", &req, REQUEST_TIMEOUT).await
    }

    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        message_thread_id: Option<i64>,
    ) -> TelegramResult<MessageId> {
        let params = CopyMessage {
            chat_id,
            from_chat_id,
            message_id,
            message_thread_id,
        };
        self.call("copyMessage", &params, REQUEST_TIMEOUT).await
    }

    async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
        icon_custom_emoji_id: Option<&str>,
    ) -> TelegramResult<ForumTopic> {
        let params = CreateForumTopic {
            chat_id,
            name,
            icon_custom_emoji_id,
        };
        self.call("createForumTopic", &params, REQUEST_TIMEOUT).await
    }

    async fn pin_chat_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()> {
        let params = PinChatMessage {
            chat_id,
            message_id,
            disable_notification: true,
        };
        self.call_true("pinChatMessage", &params).await
    }

    async fn unpin_chat_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()> {
        self.call_true("unpinChatMessage", &ChatMessage { chat_id, message_id })
            .await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()> {
        self.call_true("deleteMessage", &ChatMessage { chat_id, message_id })
            .await
    }

    async fn answer_callback_query(&self, id: &str, text: Option<&str>) -> TelegramResult<()> {
        let params = AnswerCallbackQuery {
            callback_query_id: id,
            text,
        };
        self.call_true("answerCallbackQuery", &params).await
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> TelegramResult<()> {
        let params = EditMessageText {
            chat_id,
            message_id,
            text,
            parse_mode: "HTML",
        };
        self.call_true("editMessageText", &params).await
    }

    async fn set_my_commands(
        &self,
        commands: &[BotCommand],
        scope: &BotCommandScope,
        language_code: Option<&str>,
    ) -> TelegramResult<()> {
        let params = SetMyCommands {
            commands,
            scope,
            language_code,
        };
        self.call_true("setMyCommands", &params).await
    }

    async fn delete_my_commands(
        &self,
        scope: &BotCommandScope,
        language_code: Option<&str>,
    ) -> TelegramResult<()> {
        let params = DeleteMyCommands {
            scope,
            language_code,
        };
        self.call_true("deleteMyCommands", &params).await
    }
}

/// Everything a [`RecordingBot`] was asked to do, in order.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetUpdates { offset: i64 },
    DeleteWebhook,
    SendMessage(SendMessage),
    CopyMessage {
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        message_thread_id: Option<i64>,
    },
    CreateForumTopic {
        chat_id: i64,
        name: String,
        icon_custom_emoji_id: Option<String>,
    },
    Pin { chat_id: i64, message_id: i64 },
    Unpin { chat_id: i64, message_id: i64 },
    Delete { chat_id: i64, message_id: i64 },
    AnswerCallback { id: String, text: Option<String> },
    EditText { chat_id: i64, message_id: i64, text: String },
    SetCommands {
        commands: Vec<BotCommand>,
        scope: BotCommandScope,
        language_code: Option<String>,
    },
    DeleteCommands {
        scope: BotCommandScope,
        language_code: Option<String>,
    },
}

/// [`BotApi`] double that records calls and hands out increasing ids.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingBot {
    calls: std::sync::Mutex<Vec<Call>>,
    copy_failures: std::sync::Mutex<std::collections::VecDeque<TelegramError>>,
    update_batches: std::sync::Mutex<std::collections::VecDeque<TelegramResult<Vec<Update>>>>,
    next_id: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl RecordingBot {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// The next `copy_message` call fails with `err`.
    pub fn fail_next_copy(&self, err: TelegramError) {
        self.copy_failures.lock().unwrap().push_back(err);
    }

    pub fn push_updates(&self, batch: TelegramResult<Vec<Update>>) {
        self.update_batches.lock().unwrap().push_back(batch);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self) -> i64 {
        1000 + self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl BotApi for RecordingBot {
    async fn get_updates(
        &self,
        offset: i64,
        _timeout_secs: u32,
        _allowed_updates: &[&str],
    ) -> TelegramResult<Vec<Update>> {
        self.record(Call::GetUpdates { offset });
        let next = self.update_batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn delete_webhook(&self) -> TelegramResult<()> {
        self.record(Call::DeleteWebhook);
        Ok(())
    }

    async fn send_message(&self, req: SendMessage) -> TelegramResult<Message> {
        let message_id = self.next_id();
        let message = serde_json::from_value(serde_json::json!({
            "message_id": message_id,
            "message_thread_id": req.message_thread_id,
            "chat": { "id": req.chat_id, "type": "private" },
            "date": 0,
            "text": req.text,
        }))
        .expect("valid message json");
        self.record(Call::SendMessage(req));
        Ok(message)
    }

    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        message_thread_id: Option<i64>,
    ) -> TelegramResult<MessageId> {
        self.record(Call::CopyMessage {
            chat_id,
            from_chat_id,
            message_id,
            message_thread_id,
        });
        if let Some(err) = self.copy_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(MessageId {
            message_id: self.next_id(),
        })
    }

    async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
        icon_custom_emoji_id: Option<&str>,
    ) -> TelegramResult<ForumTopic> {
        self.record(Call::CreateForumTopic {
            chat_id,
            name: name.to_string(),
            icon_custom_emoji_id: icon_custom_emoji_id.map(str::to_string),
        });
        Ok(ForumTopic {
            message_thread_id: self.next_id(),
            name: name.to_string(),
        })
    }

    async fn pin_chat_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()> {
        self.record(Call::Pin { chat_id, message_id });
        Ok(())
    }

    async fn unpin_chat_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()> {
        self.record(Call::Unpin { chat_id, message_id });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> TelegramResult<()> {
        self.record(Call::Delete { chat_id, message_id });
        Ok(())
    }

    async fn answer_callback_query(&self, id: &str, text: Option<&str>) -> TelegramResult<()> {
        self.record(Call::AnswerCallback {
            id: id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> TelegramResult<()> {
        self.record(Call::EditText {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn set_my_commands(
        &self,
        commands: &[BotCommand],
        scope: &BotCommandScope,
        language_code: Option<&str>,
    ) -> TelegramResult<()> {
        self.record(Call::SetCommands {
            commands: commands.to_vec(),
            scope: scope.clone(),
            language_code: language_code.map(str::to_string),
        });
        Ok(())
    }

    async fn delete_my_commands(
        &self,
        scope: &BotCommandScope,
        language_code: Option<&str>,
    ) -> TelegramResult<()> {
        self.record(Call::DeleteCommands {
            scope: scope.clone(),
            language_code: language_code.map(str::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_deleted_topic() {
        let err = TelegramError::api(400, "Bad Request: message thread not found");
        assert!(err.is_thread_not_found());
        assert!(!err.is_blocked_by_user());
    }

    #[test]
    fn classifies_blocked_user() {
        let err = TelegramError::api(403, "Forbidden: bot was blocked by the user");
        assert!(err.is_blocked_by_user());
        assert!(!err.is_thread_not_found());
        assert!(TelegramError::api(400, "Bad Request: user is deactivated").is_blocked_by_user());
        assert!(!TelegramError::api(400, "Bad Request: chat not found").is_blocked_by_user());
    }

    #[test]
    fn send_message_omits_empty_options() {
        let value = serde_json::to_value(SendMessage::new(5, "<b>hi</b>")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "chat_id": 5, "text": "<b>hi</b>", "parse_mode": "HTML" })
        );

        let value = serde_json::to_value(SendMessage::new(-100, "x").in_thread(9)).unwrap();
        assert_eq!(value["message_thread_id"], 9);
    }

    #[test]
    fn client_url_embeds_token() {
        let client = TelegramClient::with_base_url("http://localhost:8081/", "1:tok");
        assert_eq!(client.base_url, "http://localhost:8081/bot1:tok");
    }

    #[test]
    fn error_envelope_parses() {
        let raw = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3","parameters":{"retry_after":3}}"#;
        let body: ApiResponse<Value> = serde_json::from_str(raw).unwrap();
        assert!(!body.ok);
        assert_eq!(body.error_code, Some(429));
        assert_eq!(body.parameters.and_then(|p| p.retry_after), Some(3));
    }

    /// Local Bot API stand-in: `reply(n)` answers the n-th request (0-based).
    async fn fake_api(
        reply: fn(usize) -> Value,
    ) -> (TelegramClient, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        };

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().fallback(move || {
            let counter = counter.clone();
            async move { axum::Json(reply(counter.fetch_add(1, Ordering::SeqCst))) }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        (TelegramClient::with_base_url(&format!("http://{}", addr), "1:tok"), hits)
    }

    fn throttled() -> Value {
        serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 0",
            "parameters": { "retry_after": 0 }
        })
    }

    #[tokio::test]
    async fn throttling_is_retried_three_times_then_reported() {
        let (client, hits) = fake_api(|_| throttled()).await;

        let err = client.delete_webhook().await.unwrap_err();

        assert!(matches!(err, TelegramError::Api { code: 429, .. }));
        assert_eq!(err.retry_after(), Some(Duration::ZERO));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1 + MAX_RETRIES);
    }

    #[tokio::test]
    async fn throttled_call_succeeds_after_retry() {
        let (client, hits) = fake_api(|n| match n {
            0 | 1 => throttled(),
            _ => serde_json::json!({ "ok": true, "result": true }),
        })
        .await;

        client.delete_webhook().await.unwrap();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let (client, hits) = fake_api(|_| {
            serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })
        })
        .await;

        let err = client.delete_message(5, 6).await.unwrap_err();
        assert!(matches!(err, TelegramError::Api { code: 400, .. }));
        assert!(err.retry_after().is_none());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
