//! Routes incoming updates to handlers.
//!
//! ## Structure
//! - **message**, private chat → `private_handlers::handle_message`
//! - **message**, supergroup → `group_handlers::handle_message`
//! - **callback_query** → `private_handlers::handle_callback`
//!
//! Every update first passes through [`resolve_user_data`].

use crate::{
    errors::BotResult,
    handlers::{group_handlers, private_handlers},
    models::telegram::{ChatKind, Update},
    routes::middleware::resolve_user_data,
    state::AppState,
};

/// Update kinds requested from `getUpdates`.
pub const ALLOWED_UPDATES: &[&str] = &["message", "callback_query"];

pub async fn dispatch(state: &AppState, update: &Update) -> BotResult<()> {
    if let Some(msg) = &update.message {
        let user_data = resolve_user_data(state, &msg.chat, msg.from.as_ref()).await?;
        return match (msg.chat.kind, user_data) {
            (ChatKind::Private, Some(user)) => {
                private_handlers::handle_message(state, msg, user).await
            }
            (ChatKind::Supergroup, _) => group_handlers::handle_message(state, msg).await,
            _ => Ok(()),
        };
    }

    if let Some(query) = &update.callback_query {
        let user_data = match &query.message {
            Some(msg) => resolve_user_data(state, &msg.chat, Some(&query.from)).await?,
            None => None,
        };
        return private_handlers::handle_callback(state, query, user_data).await;
    }

    Ok(())
}
