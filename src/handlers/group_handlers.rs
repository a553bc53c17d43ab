//! Handlers for the staff side: topics in the support group.

use crate::{
    errors::BotResult,
    models::{telegram::Message, user::UserData},
    services::telegram_service::SendMessage,
    state::AppState,
    texts::{self, DEFAULT_LANGUAGE, Texts},
};
use tracing::{debug, info, warn};

pub async fn handle_message(state: &AppState, msg: &Message) -> BotResult<()> {
    let group_id = state.config.group_id;
    if msg.chat.id != group_id || msg.is_service() || !from_staff(msg, group_id) {
        return Ok(());
    }
    let Some(thread_id) = msg.topic_id() else {
        return Ok(());
    };
    let Some(mut user) = state.store.get_by_message_thread_id(thread_id).await? else {
        debug!(thread_id, "No user owns this topic");
        return Ok(());
    };

    let texts = texts::get(Some(DEFAULT_LANGUAGE));
    match msg.command().as_deref() {
        Some("information") => {
            reply(state, thread_id, texts.user_card(&user)).await?;
            Ok(())
        }
        Some("ban") => toggle_ban(state, thread_id, &mut user, texts).await,
        Some("silent") => toggle_silent(state, thread_id, &mut user, texts).await,
        _ => deliver(state, msg, thread_id, &user, texts).await,
    }
}

/// Humans in the group, or admins posting anonymously as the group itself.
fn from_staff(msg: &Message, group_id: i64) -> bool {
    if msg.sender_chat.as_ref().is_some_and(|c| c.id == group_id) {
        return true;
    }
    msg.from.as_ref().is_some_and(|u| !u.is_bot)
}

async fn reply(state: &AppState, thread_id: i64, text: impl Into<String>) -> BotResult<Message> {
    Ok(state
        .bot
        .send_message(SendMessage::new(state.config.group_id, text).in_thread(thread_id))
        .await?)
}

async fn toggle_ban(
    state: &AppState,
    thread_id: i64,
    user: &mut UserData,
    texts: &Texts,
) -> BotResult<()> {
    user.is_banned = !user.is_banned;
    state.store.update_user(user.id, user).await?;
    info!(user_id = user.id, banned = user.is_banned, "Ban toggled");

    let text = if user.is_banned {
        texts.ban_enabled
    } else {
        texts.ban_disabled
    };
    reply(state, thread_id, text).await?;
    Ok(())
}

async fn toggle_silent(
    state: &AppState,
    thread_id: i64,
    user: &mut UserData,
    texts: &Texts,
) -> BotResult<()> {
    let group_id = state.config.group_id;

    if user.message_silent_mode {
        if let Some(notice) = user.message_silent_id.take() {
            if let Err(err) = state.bot.unpin_chat_message(group_id, notice).await {
                warn!("Could not unpin silent notice {}: {}", notice, err);
            }
            if let Err(err) = state.bot.delete_message(group_id, notice).await {
                warn!("Could not delete silent notice {}: {}", notice, err);
            }
        }
        user.message_silent_mode = false;
        state.store.update_user(user.id, user).await?;
        reply(state, thread_id, texts.silent_disabled).await?;
    } else {
        let notice = reply(state, thread_id, texts.silent_enabled).await?;
        if let Err(err) = state
            .bot
            .pin_chat_message(group_id, notice.message_id)
            .await
        {
            warn!("Could not pin silent notice: {}", err);
        }
        user.message_silent_mode = true;
        user.message_silent_id = Some(notice.message_id);
        state.store.update_user(user.id, user).await?;
    }

    info!(user_id = user.id, silent = user.message_silent_mode, "Silent mode toggled");
    Ok(())
}

async fn deliver(
    state: &AppState,
    msg: &Message,
    thread_id: i64,
    user: &UserData,
    texts: &Texts,
) -> BotResult<()> {
    if user.message_silent_mode {
        return Ok(());
    }

    match state
        .bot
        .copy_message(user.id, msg.chat.id, msg.message_id, None)
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if err.is_blocked_by_user() => {
            debug!(user_id = user.id, "User blocked the bot: {}", err);
            reply(state, thread_id, texts.delivery_blocked).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
