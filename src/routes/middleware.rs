//! Per-update user resolution, run before any handler sees the update.

use crate::{
    models::{
        telegram::{Chat, ChatKind, User},
        user::UserData,
    },
    services::storage_service::StorageResult,
    state::AppState,
};
use tracing::debug;

/// Load (or create) the record of the private-chat sender and persist the
/// latest profile. Group chats and sender-less updates resolve to `None`.
pub async fn resolve_user_data(
    state: &AppState,
    chat: &Chat,
    from: Option<&User>,
) -> StorageResult<Option<UserData>> {
    let user = match (chat.kind, from) {
        (ChatKind::Private, Some(user)) => user,
        _ => return Ok(None),
    };

    let mut user_data = match state.store.get_user(user.id).await? {
        Some(mut existing) => {
            existing.refresh_profile(user);
            existing
        }
        None => {
            debug!(user_id = user.id, "First contact, creating user record");
            UserData::new(user)
        }
    };

    if let [only] = state.languages {
        user_data.language_code = Some(only.code.to_string());
    }

    state.store.update_user(user.id, &user_data).await?;
    Ok(Some(user_data))
}
