//! User-facing strings.
//!
//! Private-chat texts follow the user's chosen language; texts posted into the
//! support group always use [`DEFAULT_LANGUAGE`]. All texts are HTML, so any
//! user-controlled value must go through [`escape_html`].

use crate::models::user::UserData;

/// Language code and the label shown on its selection button.
pub struct Language {
    pub code: &'static str,
    pub label: &'static str,
}

pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language {
        code: "en",
        label: "🇬🇧 English",
    },
    Language {
        code: "ru",
        label: "🇷🇺 Русский",
    },
];

pub const DEFAULT_LANGUAGE: &str = "en";

pub struct Texts {
    pub select_language: &'static str,
    pub language_changed: &'static str,
    /// `{full_name}` is replaced with the escaped user name.
    pub greeting: &'static str,
    pub user_banned: &'static str,
    pub newsletter_usage: &'static str,
    /// `{sent}` and `{failed}` are replaced with counters.
    pub newsletter_finished: &'static str,
    pub user_card_title: &'static str,
    pub user_card_labels: CardLabels,
    pub ban_enabled: &'static str,
    pub ban_disabled: &'static str,
    pub silent_enabled: &'static str,
    pub silent_disabled: &'static str,
    pub delivery_blocked: &'static str,
    pub command_start: &'static str,
    pub command_language: &'static str,
    pub command_newsletter: &'static str,
    pub command_ban: &'static str,
    pub command_silent: &'static str,
    pub command_information: &'static str,
}

pub struct CardLabels {
    pub id: &'static str,
    pub name: &'static str,
    pub username: &'static str,
    pub language: &'static str,
    pub banned: &'static str,
    pub silent: &'static str,
    pub yes: &'static str,
    pub no: &'static str,
}

static EN: Texts = Texts {
    select_language: "Please choose your language:",
    language_changed: "Language set: English 🇬🇧",
    greeting: "Hello, <b>{full_name}</b>!\n\nWrite your question here and our support team will answer as soon as possible.",
    user_banned: "You have been blocked and your messages are not delivered to support.",
    newsletter_usage: "Reply to the message you want to broadcast with /newsletter.",
    newsletter_finished: "Newsletter finished.\nDelivered: <b>{sent}</b>\nFailed: <b>{failed}</b>",
    user_card_title: "👤 <b>User information</b>",
    user_card_labels: CardLabels {
        id: "ID",
        name: "Name",
        username: "Username",
        language: "Language",
        banned: "Blocked",
        silent: "Silent mode",
        yes: "yes",
        no: "no",
    },
    ban_enabled: "🚫 User blocked. Their messages will no longer reach this topic.",
    ban_disabled: "✅ User unblocked.",
    silent_enabled: "🔕 Silent mode enabled: messages in this topic are not delivered to the user.",
    silent_disabled: "🔔 Silent mode disabled: messages are delivered to the user again.",
    delivery_blocked: "⚠️ Message not delivered: the user has blocked the bot.",
    command_start: "Restart the bot",
    command_language: "Change language",
    command_newsletter: "Broadcast the replied message to all users",
    command_ban: "Block / unblock the user",
    command_silent: "Toggle silent mode",
    command_information: "Show user information",
};

static RU: Texts = Texts {
    select_language: "Пожалуйста, выберите язык:",
    language_changed: "Язык установлен: Русский 🇷🇺",
    greeting: "Здравствуйте, <b>{full_name}</b>!\n\nНапишите свой вопрос, и служба поддержки ответит как можно скорее.",
    user_banned: "Вы заблокированы, ваши сообщения не доставляются в поддержку.",
    newsletter_usage: "Ответьте командой /newsletter на сообщение, которое нужно разослать.",
    newsletter_finished: "Рассылка завершена.\nДоставлено: <b>{sent}</b>\nОшибок: <b>{failed}</b>",
    user_card_title: "👤 <b>Информация о пользователе</b>",
    user_card_labels: CardLabels {
        id: "ID",
        name: "Имя",
        username: "Юзернейм",
        language: "Язык",
        banned: "Заблокирован",
        silent: "Тихий режим",
        yes: "да",
        no: "нет",
    },
    ban_enabled: "🚫 Пользователь заблокирован. Его сообщения больше не попадут в эту тему.",
    ban_disabled: "✅ Пользователь разблокирован.",
    silent_enabled: "🔕 Тихий режим включён: сообщения в этой теме не доставляются пользователю.",
    silent_disabled: "🔔 Тихий режим выключен: сообщения снова доставляются пользователю.",
    delivery_blocked: "⚠️ Сообщение не доставлено: пользователь заблокировал бота.",
    command_start: "Перезапустить бота",
    command_language: "Сменить язык",
    command_newsletter: "Разослать сообщение всем пользователям",
    command_ban: "Заблокировать / разблокировать пользователя",
    command_silent: "Переключить тихий режим",
    command_information: "Информация о пользователе",
};

/// Catalog for `code`, falling back to [`DEFAULT_LANGUAGE`].
pub fn get(code: Option<&str>) -> &'static Texts {
    match code {
        Some("ru") => &RU,
        _ => &EN,
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

impl Texts {
    pub fn greeting(&self, full_name: &str) -> String {
        self.greeting.replace("{full_name}", &escape_html(full_name))
    }

    pub fn newsletter_finished(&self, sent: usize, failed: usize) -> String {
        self.newsletter_finished
            .replace("{sent}", &sent.to_string())
            .replace("{failed}", &failed.to_string())
    }

    /// Summary of a user posted into their support topic.
    pub fn user_card(&self, user: &UserData) -> String {
        let l = &self.user_card_labels;
        let flag = |v: bool| if v { l.yes } else { l.no };
        format!(
            "{title}\n\n\
             <b>{id_l}:</b> <code>{id}</code>\n\
             <b>{name_l}:</b> <a href=\"tg://user?id={id}\">{name}</a>\n\
             <b>{user_l}:</b> {username}\n\
             <b>{lang_l}:</b> {lang}\n\
             <b>{ban_l}:</b> {banned}\n\
             <b>{silent_l}:</b> {silent}",
            title = self.user_card_title,
            id_l = l.id,
            id = user.id,
            name_l = l.name,
            name = escape_html(&user.full_name),
            user_l = l.username,
            username = escape_html(&user.username),
            lang_l = l.language,
            lang = user.language_code.as_deref().unwrap_or("-"),
            ban_l = l.banned,
            banned = flag(user.is_banned),
            silent_l = l.silent,
            silent = flag(user.message_silent_mode),
        )
    }
}
