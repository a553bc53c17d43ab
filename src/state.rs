//! Dependencies shared by every handler.

use crate::{
    config::BotConfig,
    services::{storage_service::UserStore, telegram_service::BotApi},
    texts::Language,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<dyn BotApi>,
    pub store: Arc<dyn UserStore>,
    pub config: Arc<BotConfig>,
    /// Languages users may pick from; a single entry disables the picker.
    pub languages: &'static [Language],
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::{
        models::user::UserData,
        services::{storage_service::MemoryUserStore, telegram_service::RecordingBot},
        texts::SUPPORTED_LANGUAGES,
    };

    pub const DEV_ID: i64 = 1;
    pub const GROUP_ID: i64 = -1001;
    pub const EMOJI_ID: &str = "5417915203100613993";

    pub struct Harness {
        pub state: AppState,
        pub bot: Arc<RecordingBot>,
        pub store: Arc<MemoryUserStore>,
    }

    pub fn harness(users: Vec<UserData>) -> Harness {
        harness_with_languages(users, SUPPORTED_LANGUAGES)
    }

    pub fn harness_with_languages(users: Vec<UserData>, languages: &'static [Language]) -> Harness {
        let bot = Arc::new(RecordingBot::default());
        let store = Arc::new(MemoryUserStore::with_users(users));
        let state = AppState {
            bot: bot.clone(),
            store: store.clone(),
            config: Arc::new(BotConfig {
                token: "1:test".into(),
                dev_id: DEV_ID,
                group_id: GROUP_ID,
                emoji_id: EMOJI_ID.into(),
            }),
            languages,
        };
        Harness { state, bot, store }
    }

    pub fn user(id: i64) -> UserData {
        UserData {
            id,
            full_name: format!("User {}", id),
            username: "-".into(),
            message_thread_id: None,
            message_silent_id: None,
            message_silent_mode: false,
            is_banned: false,
            language_code: Some("en".into()),
        }
    }
}
