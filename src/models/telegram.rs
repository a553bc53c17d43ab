//! Bot API objects, limited to the fields this bot reads or sends.
//!
//! Unknown fields are ignored on deserialization, so Telegram adding new
//! attributes never breaks update parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope returned by every Bot API method.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<u16>,
    pub description: Option<String>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseParameters {
    /// Seconds to wait before repeating a throttled request.
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub message_thread_id: Option<i64>,
    pub from: Option<User>,
    /// Set when an anonymous admin posts on behalf of the group.
    pub sender_chat: Option<Chat>,
    pub chat: Chat,
    #[serde(default)]
    pub is_topic_message: bool,
    pub text: Option<String>,
    pub reply_to_message: Option<Box<Message>>,
    pub forum_topic_created: Option<Value>,
    pub forum_topic_edited: Option<Value>,
    pub forum_topic_closed: Option<Value>,
    pub forum_topic_reopened: Option<Value>,
    pub pinned_message: Option<Value>,
}

impl Message {
    /// Bot command at the start of the text, without the slash or `@botname`.
    ///
    /// `/Start@support_bot hello` yields `start`.
    pub fn command(&self) -> Option<String> {
        let text = self.text.as_deref()?;
        let token = text.split_whitespace().next()?;
        let name = token.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or_default();
        if name.is_empty() {
            return None;
        }
        Some(name.to_lowercase())
    }

    /// Topic bookkeeping messages generated by Telegram itself.
    pub fn is_service(&self) -> bool {
        self.forum_topic_created.is_some()
            || self.forum_topic_edited.is_some()
            || self.forum_topic_closed.is_some()
            || self.forum_topic_reopened.is_some()
            || self.pinned_message.is_some()
    }

    /// Forum topic the message was posted in, if any.
    pub fn topic_id(&self) -> Option<i64> {
        if self.is_topic_message {
            self.message_thread_id
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// Result of `copyMessage`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct MessageId {
    pub message_id: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ForumTopic {
    pub message_thread_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

impl BotCommand {
    pub fn new(command: &str, description: &str) -> Self {
        Self {
            command: command.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotCommandScope {
    Default,
    AllPrivateChats,
    Chat { chat_id: i64 },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}
