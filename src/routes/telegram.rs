use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::models::telegram::TelegramUpdate;
use crate::services::telegram_service::{form_url, is_start_command, reply_for, Messenger};
use crate::AppState;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(label): Path<String>,
    headers: HeaderMap,
    Json(update): Json<TelegramUpdate>,
) -> Result<StatusCode> {
    verify_secret(&headers, state.config.webhook_secret.as_deref())?;
    let bot = state
        .bot(&label)
        .ok_or_else(|| Error::NotFound(format!("unknown bot {}", label)))?
        .clone();

    tracing::info!(bot = %label, "Received Telegram webhook update ID: {}", update.update_id);
    let Some(message) = update.message else {
        return Ok(StatusCode::OK);
    };

    let url = form_url(&state.config.webapp_url, bot.label());
    let Some(reply) = reply_for(&message, &url) else {
        return Ok(StatusCode::OK);
    };

    // Telegram redelivers on non-2xx, so delivery failures are only logged.
    if let Err(e) = bot.send_message(reply).await {
        tracing::warn!(bot = %label, "Failed to answer chat {}: {}", message.chat.id, e);
    }

    let started = message.text.as_deref().is_some_and(is_start_command);
    if let (true, Some(from)) = (started, message.from.as_ref()) {
        if state.reminder_service.is_enabled()
            && !from.is_bot
            && !state
                .reminder_service
                .schedule(Arc::new(bot), message.chat.id, from.id, url)
        {
            tracing::debug!(bot = %label, "Reminder already pending for user {}", from.id);
        }
    }

    Ok(StatusCode::OK)
}

fn verify_secret(headers: &HeaderMap, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let Some(provided) = headers.get(SECRET_HEADER) else {
        return Err(Error::Unauthorized("missing_webhook_secret".into()));
    };
    let provided = provided
        .to_str()
        .map_err(|_| Error::Unauthorized("invalid_secret_header".into()))?;
    if ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(Error::Unauthorized("invalid_webhook_secret".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn secret_is_optional_until_configured() {
        assert!(verify_secret(&HeaderMap::new(), None).is_ok());
        assert!(matches!(
            verify_secret(&HeaderMap::new(), Some("s3cret")),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn secret_must_match() {
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert!(verify_secret(&headers, Some("s3cret")).is_err());
        headers.insert(SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(verify_secret(&headers, Some("s3cret")).is_ok());
    }
}
