//! Represents a user that talks to the bot in a private chat.

use crate::models::telegram::User;
use serde::{Deserialize, Serialize};

/// Stored state of one support conversation.
///
/// Each user owns at most one forum topic in the support group; the topic id
/// is the link between the private chat and the staff side.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserData {
    /// Telegram user id (also the private chat id).
    pub id: i64,

    /// Display name as last seen on Telegram.
    pub full_name: String,

    /// `@username`, or `-` when the user has none.
    pub username: String,

    /// Forum topic in the support group, once created.
    #[serde(default)]
    pub message_thread_id: Option<i64>,

    /// Pinned notice announcing silent mode inside the topic.
    #[serde(default)]
    pub message_silent_id: Option<i64>,

    /// When set, staff messages in the topic are not delivered to the user.
    #[serde(default)]
    pub message_silent_mode: bool,

    /// Banned users cannot reach the support group.
    #[serde(default)]
    pub is_banned: bool,

    /// Chosen interface language.
    #[serde(default)]
    pub language_code: Option<String>,
}

impl UserData {
    /// Fresh record for a user seen for the first time.
    pub fn new(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name(),
            username: format_username(user.username.as_deref()),
            message_thread_id: None,
            message_silent_id: None,
            message_silent_mode: false,
            is_banned: false,
            language_code: None,
        }
    }

    /// Copy name fields from the latest Telegram profile.
    pub fn refresh_profile(&mut self, user: &User) {
        self.full_name = user.full_name();
        self.username = format_username(user.username.as_deref());
    }
}

fn format_username(username: Option<&str>) -> String {
    match username {
        Some(name) if !name.is_empty() => format!("@{}", name),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tg_user(username: Option<&str>) -> User {
        User {
            id: 10,
            is_bot: false,
            first_name: "Ada".into(),
            last_name: Some("Lovelace".into()),
            username: username.map(str::to_string),
            language_code: None,
        }
    }

    #[test]
    fn new_user_has_defaults() {
        let data = UserData::new(&tg_user(Some("ada")));
        assert_eq!(data.id, 10);
        assert_eq!(data.full_name, "Ada Lovelace");
        assert_eq!(data.username, "@ada");
        assert!(data.message_thread_id.is_none());
        assert!(!data.is_banned);
        assert!(!data.message_silent_mode);
    }

    #[test]
    fn missing_username_renders_as_dash() {
        let data = UserData::new(&tg_user(None));
        assert_eq!(data.username, "-");
    }

    #[test]
    fn refresh_keeps_conversation_state() {
        let mut data = UserData::new(&tg_user(None));
        data.message_thread_id = Some(77);
        data.is_banned = true;

        let mut renamed = tg_user(Some("countess"));
        renamed.first_name = "Augusta".into();
        data.refresh_profile(&renamed);

        assert_eq!(data.full_name, "Augusta Lovelace");
        assert_eq!(data.username, "@countess");
        assert_eq!(data.message_thread_id, Some(77));
        assert!(data.is_banned);
    }

    #[test]
    fn legacy_documents_deserialize() {
        // Records written before language selection existed, with a Mongo `_id`.
        let json = r#"{
            "_id": "65f0c0ffee",
            "id": 5,
            "full_name": "Bob",
            "username": "-",
            "message_thread_id": 12,
            "message_silent_id": null,
            "message_silent_mode": false,
            "is_banned": false
        }"#;
        let data: UserData = serde_json::from_str(json).unwrap();
        assert_eq!(data.message_thread_id, Some(12));
        assert!(data.language_code.is_none());
    }
}
