use crate::config::BotConfig;
use crate::error::{Error, Result};
use crate::models::telegram::{
    ApiResponse, InlineKeyboardButton, InlineKeyboardMarkup, OutgoingMessage, TelegramMessage,
    WebAppInfo, WebhookInfo,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use url::Url;

pub const WELCOME_TEXT: &str =
    "👋 Добро пожаловать в ОМС Онлайн!\n\nНажмите кнопку ниже, чтобы заполнить анкету.";
pub const HELP_TEXT: &str = "Чтобы открыть анкету ОМС, используйте команду /start";
pub const REMINDER_TEXT: &str =
    "⏰ Вы ещё не заполнили анкету ОМС. Это займёт пару минут:";
pub const OPEN_FORM_BUTTON: &str = "Открыть анкету ОМС";

/// Anything that can deliver a bot message to a chat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, message: OutgoingMessage) -> Result<()>;
}

/// Bot API client for one configured bot.
#[derive(Clone)]
pub struct BotClient {
    client: Client,
    api_url: String,
    bot: BotConfig,
}

impl BotClient {
    pub fn new(client: Client, api_url: &str, bot: BotConfig) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot,
        }
    }

    pub fn label(&self) -> &str {
        &self.bot.label
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot.token, method)
    }

    async fn call<T>(&self, method: &str, body: serde_json::Value) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response: ApiResponse<T> = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Telegram(format!("{} request failed: {}", method, e.without_url())))?
            .json()
            .await
            .map_err(|e| Error::Telegram(format!("{} response unreadable: {}", method, e.without_url())))?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(Error::Telegram(format!(
                "{} rejected: {}",
                method,
                description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }

    /// Points the bot's webhook at `target_url` unless it already is.
    pub async fn ensure_webhook(&self, target_url: &str, secret: Option<&str>) -> Result<()> {
        let info: WebhookInfo = self.call("getWebhookInfo", json!({})).await?;
        if info.url == target_url {
            tracing::info!(bot = %self.label(), "Telegram webhook is already up to date: {}", target_url);
            return Ok(());
        }

        tracing::info!(bot = %self.label(), "Updating Telegram webhook: {} -> {}", info.url, target_url);
        let mut body = json!({
            "url": target_url,
            "allowed_updates": ["message"],
        });
        if let Some(secret) = secret {
            body["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", body).await?;
        tracing::info!(bot = %self.label(), "Telegram webhook registered successfully");
        Ok(())
    }
}

#[async_trait]
impl Messenger for BotClient {
    async fn send_message(&self, message: OutgoingMessage) -> Result<()> {
        tracing::info!(bot = %self.label(), "Sending Telegram message to chat_id: {}", message.chat_id);
        let body = serde_json::to_value(&message)?;
        let _: serde_json::Value = self.call("sendMessage", body).await?;
        Ok(())
    }
}

/// The Mini App URL tagged with the bot label, so submissions can be
/// attributed to the bot that opened the form.
pub fn form_url(webapp_url: &str, label: &str) -> String {
    match Url::parse(webapp_url) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("bot", label);
            url.to_string()
        }
        Err(_) => {
            let separator = if webapp_url.contains('?') { '&' } else { '?' };
            format!(
                "{}{}bot={}",
                webapp_url,
                separator,
                urlencoding::encode(label)
            )
        }
    }
}

fn open_form_keyboard(form_url: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineKeyboardButton {
            text: OPEN_FORM_BUTTON.to_string(),
            web_app: WebAppInfo {
                url: form_url.to_string(),
            },
        }]],
    }
}

pub fn start_reply(chat_id: i64, form_url: &str) -> OutgoingMessage {
    OutgoingMessage {
        chat_id,
        text: WELCOME_TEXT.to_string(),
        parse_mode: Some("HTML".to_string()),
        reply_markup: Some(open_form_keyboard(form_url)),
    }
}

pub fn help_reply(chat_id: i64) -> OutgoingMessage {
    OutgoingMessage {
        chat_id,
        text: HELP_TEXT.to_string(),
        parse_mode: None,
        reply_markup: None,
    }
}

pub fn reminder_message(chat_id: i64, form_url: &str) -> OutgoingMessage {
    OutgoingMessage {
        chat_id,
        text: REMINDER_TEXT.to_string(),
        parse_mode: None,
        reply_markup: Some(open_form_keyboard(form_url)),
    }
}

/// `/start`, `/start payload` and `/start@botname` all count.
pub fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    let command = command.split('@').next().unwrap_or_default();
    command == "/start"
}

/// Decides the reply to an incoming message. Messages without text get none.
pub fn reply_for(message: &TelegramMessage, form_url: &str) -> Option<OutgoingMessage> {
    let text = message.text.as_deref()?;
    if is_start_command(text) {
        Some(start_reply(message.chat.id, form_url))
    } else {
        Some(help_reply(message.chat.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::telegram::TelegramChat;

    fn message(text: Option<&str>) -> TelegramMessage {
        TelegramMessage {
            message_id: 1,
            from: None,
            chat: TelegramChat {
                id: 77,
                r#type: "private".to_string(),
            },
            text: text.map(str::to_string),
        }
    }

    #[test]
    fn recognises_start_variants() {
        assert!(is_start_command("/start"));
        assert!(is_start_command("/start ref42"));
        assert!(is_start_command("/start@oms_bot"));
        assert!(!is_start_command("/started"));
        assert!(!is_start_command("hello /start"));
        assert!(!is_start_command(""));
    }

    #[test]
    fn start_reply_carries_web_app_button() {
        let reply = reply_for(&message(Some("/start")), "https://oms.example/?bot=main").unwrap();
        assert_eq!(reply.chat_id, 77);
        assert_eq!(reply.text, WELCOME_TEXT);
        let markup = reply.reply_markup.unwrap();
        assert_eq!(markup.inline_keyboard[0][0].text, OPEN_FORM_BUTTON);
        assert_eq!(
            markup.inline_keyboard[0][0].web_app.url,
            "https://oms.example/?bot=main"
        );
    }

    #[test]
    fn other_text_gets_help_and_no_text_gets_nothing() {
        let reply = reply_for(&message(Some("hi")), "https://oms.example/").unwrap();
        assert_eq!(reply.text, HELP_TEXT);
        assert!(reply.reply_markup.is_none());
        assert!(reply_for(&message(None), "https://oms.example/").is_none());
    }

    #[test]
    fn form_url_appends_bot_label() {
        assert_eq!(
            form_url("https://oms-mini-app.example/", "clinic 2"),
            "https://oms-mini-app.example/?bot=clinic+2"
        );
        assert_eq!(
            form_url("https://oms-mini-app.example/?lang=ru", "main"),
            "https://oms-mini-app.example/?lang=ru&bot=main"
        );
    }

    #[test]
    fn outgoing_message_serializes_for_bot_api() {
        let value = serde_json::to_value(start_reply(5, "https://x.example/")).unwrap();
        assert_eq!(value["chat_id"], 5);
        assert_eq!(value["parse_mode"], "HTML");
        assert_eq!(
            value["reply_markup"]["inline_keyboard"][0][0]["web_app"]["url"],
            "https://x.example/"
        );
        let help = serde_json::to_value(help_reply(5)).unwrap();
        assert!(help.get("reply_markup").is_none());
    }
}
