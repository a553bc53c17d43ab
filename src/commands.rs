//! Bot command menus, registered at startup and removed at shutdown.
//!
//! Three scopes are managed: every private chat (one menu per supported
//! language plus a default), the support group, and the developer's chat.

use crate::{
    config::BotConfig,
    models::telegram::{BotCommand, BotCommandScope},
    services::telegram_service::{BotApi, TelegramResult},
    texts::{self, DEFAULT_LANGUAGE, Language},
};

fn private_commands(texts: &texts::Texts) -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", texts.command_start),
        BotCommand::new("language", texts.command_language),
    ]
}

fn group_commands(texts: &texts::Texts) -> Vec<BotCommand> {
    vec![
        BotCommand::new("ban", texts.command_ban),
        BotCommand::new("silent", texts.command_silent),
        BotCommand::new("information", texts.command_information),
    ]
}

fn dev_commands(texts: &texts::Texts) -> Vec<BotCommand> {
    let mut commands = private_commands(texts);
    commands.push(BotCommand::new("newsletter", texts.command_newsletter));
    commands
}

/// Private-chat language variants: `None` (fallback) plus each language.
fn private_variants(languages: &[Language]) -> Vec<Option<&'static str>> {
    std::iter::once(None)
        .chain(languages.iter().map(|l| Some(l.code)))
        .collect()
}

pub async fn setup(bot: &dyn BotApi, config: &BotConfig, languages: &[Language]) -> TelegramResult<()> {
    for code in private_variants(languages) {
        let texts = texts::get(code);
        bot.set_my_commands(&private_commands(texts), &BotCommandScope::AllPrivateChats, code)
            .await?;
    }

    let default = texts::get(Some(DEFAULT_LANGUAGE));
    bot.set_my_commands(
        &group_commands(default),
        &BotCommandScope::Chat {
            chat_id: config.group_id,
        },
        None,
    )
    .await?;
    bot.set_my_commands(
        &dev_commands(default),
        &BotCommandScope::Chat {
            chat_id: config.dev_id,
        },
        None,
    )
    .await?;

    Ok(())
}

pub async fn delete(bot: &dyn BotApi, config: &BotConfig, languages: &[Language]) -> TelegramResult<()> {
    for code in private_variants(languages) {
        bot.delete_my_commands(&BotCommandScope::AllPrivateChats, code)
            .await?;
    }
    for chat_id in [config.group_id, config.dev_id] {
        bot.delete_my_commands(&BotCommandScope::Chat { chat_id }, None)
            .await?;
    }
    Ok(())
}
