use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId, ReplyParameters};
use tracing::{error, warn};

use crate::config::CONFIG;
use crate::handlers::media::download_file;
use crate::handlers::responses::send_chunked_reply;
use crate::llm::{ChatPart, ChatTurn, GenerationError};
use crate::state::AppState;
use crate::utils::telegram::start_chat_action_heartbeat;

const DEFAULT_PHOTO_QUESTION: &str = "Describe what is in this photo.";

fn chat_error_text(err: &GenerationError) -> String {
    match err {
        GenerationError::Http { status, .. } => format!("❌ Gemini error: {}", status.as_u16()),
        other => format!("❌ Error: {other}"),
    }
}

pub async fn text_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(text) = message.text() else {
        return Ok(());
    };
    let turn = ChatTurn::user(vec![ChatPart::text(text)]);
    converse(&bot, &state, &message, turn).await
}

pub async fn photo_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    photo: FileId,
) -> Result<()> {
    let bytes = match download_file(&bot, &photo).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("photo download failed: {err:?}");
            bot.send_message(message.chat.id, "❌ Could not download the photo.")
                .reply_parameters(ReplyParameters::new(message.id))
                .await?;
            return Ok(());
        }
    };

    let question = message
        .caption()
        .map(str::trim)
        .filter(|caption| !caption.is_empty())
        .unwrap_or(DEFAULT_PHOTO_QUESTION);
    let turn = ChatTurn::user(vec![ChatPart::image(&bytes), ChatPart::text(question)]);
    converse(&bot, &state, &message, turn).await
}

async fn converse(bot: &Bot, state: &AppState, message: &Message, turn: ChatTurn) -> Result<()> {
    let user = message.from.as_ref().map(|user| user.id);
    let settings = state.sessions.settings_for(user);
    let history = state.sessions.history_with(user, &turn);

    let status = bot
        .send_message(message.chat.id, "⏳")
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    let typing = start_chat_action_heartbeat(bot.clone(), message.chat.id, ChatAction::Typing);
    let result = state.gemini.chat(settings.model.id, &history).await;
    drop(typing);

    match result {
        Ok(reply) => {
            if let Some(user) = user {
                state
                    .sessions
                    .record_exchange(user, turn, ChatTurn::model(reply.clone()));
            }
            if let Err(err) = bot.delete_message(status.chat.id, status.id).await {
                warn!("failed to delete status message: {err}");
            }
            send_chunked_reply(
                bot,
                message.chat.id,
                message.id,
                &reply,
                CONFIG.telegram_chunk_length,
            )
            .await?;
        }
        Err(err) => {
            match &err {
                GenerationError::Other(inner) => error!(model = settings.model.id, "chat failed: {inner:?}"),
                _ => warn!(model = settings.model.id, "chat failed: {err}"),
            }
            bot.edit_message_text(status.chat.id, status.id, chat_error_text(&err))
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn chat_errors_show_status_code_only_for_http_failures() {
        let http = GenerationError::Http {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "overloaded".to_string(),
        };
        assert_eq!(chat_error_text(&http), "❌ Gemini error: 503");

        let malformed = GenerationError::MalformedResponse("text".to_string());
        assert_eq!(
            chat_error_text(&malformed),
            "❌ Error: Gemini response is missing text"
        );
    }
}
