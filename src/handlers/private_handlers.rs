//! Handlers for the user side: private chats with the bot.
//!
//! Ordinary messages are copied into the user's forum topic in the support
//! group, creating the topic on first contact. The developer can broadcast a
//! message to every user with `/newsletter`.

use crate::{
    errors::BotResult,
    models::{
        telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message},
        user::UserData,
    },
    services::telegram_service::SendMessage,
    state::AppState,
    texts::{self, DEFAULT_LANGUAGE, Texts},
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Prefix of the language picker's callback data (`lang:en`).
pub const LANGUAGE_CALLBACK_PREFIX: &str = "lang:";

/// Telegram caps topic names at 128 characters.
const TOPIC_NAME_MAX_CHARS: usize = 128;

/// Pause between newsletter sends; keeps the bot under ~30 messages/s.
const NEWSLETTER_DELAY: Duration = Duration::from_millis(50);

pub async fn handle_message(state: &AppState, msg: &Message, mut user: UserData) -> BotResult<()> {
    // Before a language is picked, prompts follow the Telegram client language.
    let client_language = msg.from.as_ref().and_then(|u| u.language_code.as_deref());
    let texts = texts::get(user.language_code.as_deref().or(client_language));

    if user.is_banned {
        debug!(user_id = user.id, "Dropping message from banned user");
        state
            .bot
            .send_message(SendMessage::new(user.id, texts.user_banned))
            .await?;
        return Ok(());
    }

    match msg.command().as_deref() {
        Some("start") => return start(state, &user).await,
        Some("language") => return ask_language(state, user.id, texts).await,
        Some("newsletter") if user.id == state.config.dev_id => {
            return match msg.reply_to_message.as_deref() {
                Some(source) => {
                    start_newsletter(state, msg.chat.id, source, texts);
                    Ok(())
                }
                None => {
                    state
                        .bot
                        .send_message(SendMessage::new(msg.chat.id, texts.newsletter_usage))
                        .await?;
                    Ok(())
                }
            };
        }
        _ => {}
    }

    if needs_language(state, &user) {
        return ask_language(state, user.id, texts).await;
    }

    forward_to_topic(state, msg, &mut user).await
}

/// Language picker answers (`lang:<code>`).
pub async fn handle_callback(
    state: &AppState,
    query: &CallbackQuery,
    user: Option<UserData>,
) -> BotResult<()> {
    let code = query
        .data
        .as_deref()
        .and_then(|data| data.strip_prefix(LANGUAGE_CALLBACK_PREFIX))
        .filter(|code| state.languages.iter().any(|l| l.code == *code));

    let (Some(code), Some(mut user)) = (code, user) else {
        state.bot.answer_callback_query(&query.id, None).await?;
        return Ok(());
    };

    user.language_code = Some(code.to_string());
    state.store.update_user(user.id, &user).await?;

    let texts = texts::get(Some(code));
    state
        .bot
        .answer_callback_query(&query.id, Some(texts.language_changed))
        .await?;

    if let Some(picker) = &query.message {
        if let Err(err) = state
            .bot
            .edit_message_text(picker.chat.id, picker.message_id, texts.language_changed)
            .await
        {
            warn!("Could not update language picker: {}", err);
        }
    }

    send_greeting(state, &user, texts).await
}

async fn start(state: &AppState, user: &UserData) -> BotResult<()> {
    let texts = texts::get(user.language_code.as_deref());
    if needs_language(state, user) {
        return ask_language(state, user.id, texts).await;
    }
    send_greeting(state, user, texts).await
}

fn needs_language(state: &AppState, user: &UserData) -> bool {
    user.language_code.is_none() && state.languages.len() > 1
}

async fn send_greeting(state: &AppState, user: &UserData, texts: &Texts) -> BotResult<()> {
    state
        .bot
        .send_message(SendMessage::new(user.id, texts.greeting(&user.full_name)))
        .await?;
    Ok(())
}

async fn ask_language(state: &AppState, chat_id: i64, texts: &Texts) -> BotResult<()> {
    let keyboard = InlineKeyboardMarkup {
        inline_keyboard: state
            .languages
            .iter()
            .map(|lang| {
                vec![InlineKeyboardButton {
                    text: lang.label.to_string(),
                    callback_data: format!("{}{}", LANGUAGE_CALLBACK_PREFIX, lang.code),
                }]
            })
            .collect(),
    };
    state
        .bot
        .send_message(SendMessage::new(chat_id, texts.select_language).with_keyboard(keyboard))
        .await?;
    Ok(())
}

/// Copy `msg` into the user's topic, reopening a fresh topic once if the old
/// one was deleted by the staff.
async fn forward_to_topic(state: &AppState, msg: &Message, user: &mut UserData) -> BotResult<()> {
    let group_id = state.config.group_id;
    let thread_id = match user.message_thread_id {
        Some(id) => id,
        None => open_topic(state, user).await?,
    };

    match state
        .bot
        .copy_message(group_id, msg.chat.id, msg.message_id, Some(thread_id))
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if err.is_thread_not_found() => {
            warn!(user_id = user.id, thread_id, "Topic no longer exists, opening a new one");
            user.message_thread_id = None;
            user.message_silent_id = None;
            user.message_silent_mode = false;
            let thread_id = open_topic(state, user).await?;
            state
                .bot
                .copy_message(group_id, msg.chat.id, msg.message_id, Some(thread_id))
                .await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Create the user's topic, persist its id and post the user card into it.
async fn open_topic(state: &AppState, user: &mut UserData) -> BotResult<i64> {
    let topic = state
        .bot
        .create_forum_topic(
            state.config.group_id,
            &topic_name(user),
            Some(state.config.emoji_id.as_str()),
        )
        .await?;
    info!(user_id = user.id, thread_id = topic.message_thread_id, "Opened topic `{}`", topic.name);

    user.message_thread_id = Some(topic.message_thread_id);
    state.store.update_user(user.id, user).await?;

    let card = texts::get(Some(DEFAULT_LANGUAGE)).user_card(user);
    state
        .bot
        .send_message(SendMessage::new(state.config.group_id, card).in_thread(topic.message_thread_id))
        .await?;

    Ok(topic.message_thread_id)
}

fn topic_name(user: &UserData) -> String {
    let name = user.full_name.trim();
    if name.is_empty() {
        return user.id.to_string();
    }
    name.chars().take(TOPIC_NAME_MAX_CHARS).collect()
}

/// Run the broadcast on its own task; polling keeps serving support traffic.
fn start_newsletter(
    state: &AppState,
    dev_chat: i64,
    source: &Message,
    texts: &'static Texts,
) {
    let state = state.clone();
    let (from_chat_id, message_id) = (source.chat.id, source.message_id);
    tokio::spawn(async move {
        if let Err(err) = newsletter(&state, dev_chat, from_chat_id, message_id, texts).await {
            error!("Newsletter failed: {}", err);
        }
    });
}

/// Copy a message to every known user except the developer and report counts.
async fn newsletter(
    state: &AppState,
    dev_chat: i64,
    from_chat_id: i64,
    message_id: i64,
    texts: &Texts,
) -> BotResult<()> {
    let ids = state.store.get_all_users_ids().await?;
    let recipients: Vec<i64> = ids
        .into_iter()
        .filter(|id| *id != state.config.dev_id)
        .collect();
    info!("Newsletter to {} users", recipients.len());

    let (mut sent, mut failed) = (0usize, 0usize);
    for (i, id) in recipients.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(NEWSLETTER_DELAY).await;
        }
        match state
            .bot
            .copy_message(*id, from_chat_id, message_id, None)
            .await
        {
            Ok(_) => sent += 1,
            Err(err) => {
                debug!(user_id = id, "Newsletter delivery failed: {}", err);
                failed += 1;
            }
        }
    }

    info!("Newsletter finished: {} sent, {} failed", sent, failed);
    state
        .bot
        .send_message(SendMessage::new(dev_chat, texts.newsletter_finished(sent, failed)))
        .await?;
    Ok(())
}
