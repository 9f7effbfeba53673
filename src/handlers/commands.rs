use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, ReplyParameters};
use tracing::info;

use crate::album::{GenerationMode, ReplyTarget};
use crate::config::{MODELS, SIZE_PRESETS};
use crate::state::AppState;

pub const MODEL_CALLBACK_PREFIX: &str = "model:";
pub const SIZE_CALLBACK_PREFIX: &str = "size:";

fn checked(label: &str, selected: bool) -> String {
    if selected {
        format!("✅ {label}")
    } else {
        label.to_string()
    }
}

pub fn model_keyboard(current: &str) -> InlineKeyboardMarkup {
    let rows = MODELS
        .iter()
        .map(|model| {
            vec![InlineKeyboardButton::callback(
                checked(model.label, model.key == current),
                format!("{}{}", MODEL_CALLBACK_PREFIX, model.key),
            )]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

pub fn size_keyboard(current: &str) -> InlineKeyboardMarkup {
    let buttons = SIZE_PRESETS
        .iter()
        .map(|preset| {
            InlineKeyboardButton::callback(
                checked(
                    &format!("{} ({})", preset.label, preset.describe()),
                    preset.key == current,
                ),
                format!("{}{}", SIZE_CALLBACK_PREFIX, preset.key),
            )
        })
        .collect::<Vec<_>>();

    let rows = buttons
        .chunks(2)
        .map(|chunk| chunk.to_vec())
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn help_text(model_label: &str, size_label: &str) -> String {
    format!(
        "👋 Hi! I am Gemini inside Telegram.\n\n\
Just write to me and I will answer. You can send text or photos.\n\n\
Current model: <b>{}</b>\n\
Label size: <b>{}</b>\n\n\
⚙️ Commands:\n\
<code>/model</code> — switch model\n\
<code>/size</code> — choose the label size\n\
<code>/draw &lt;description&gt;</code> — draw a picture\n\
<code>/svg &lt;description&gt;</code> — design a print-ready SVG label\n\
<code>/clear</code> — clear the conversation history\n\
<code>/start</code> — this message\n\n\
Send several photos as one album to generate from all of them. \
Start the caption with <code>/svg</code> for a vector label, anything else renders a preview image.",
        escape_html(model_label),
        escape_html(size_label)
    )
}

pub async fn start_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let settings = state
        .sessions
        .settings_for(message.from.as_ref().map(|user| user.id));
    let text = help_text(
        settings.model.label,
        &format!("{} ({})", settings.size.label, settings.size.describe()),
    );
    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn model_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let settings = state
        .sessions
        .settings_for(message.from.as_ref().map(|user| user.id));
    bot.send_message(message.chat.id, "Choose a model:")
        .reply_markup(model_keyboard(settings.model.key))
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn size_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let settings = state
        .sessions
        .settings_for(message.from.as_ref().map(|user| user.id));
    bot.send_message(message.chat.id, "Choose the label size:")
        .reply_markup(size_keyboard(settings.size.key))
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

pub async fn clear_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    if let Some(user) = message.from.as_ref() {
        state.sessions.clear_history(user.id);
    }
    bot.send_message(message.chat.id, "🗑 Conversation history cleared.")
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(())
}

fn usage_text(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::VectorLabel => {
            "✏️ Describe the label.\nExample: /svg shampoo label with the ÉCLAT logo\n\n\
Or send photos with the caption /svg <description>"
        }
        GenerationMode::RasterVisualization => {
            "✏️ Tell me what to draw.\nExample: /draw shampoo bottle with the ÉCLAT logo\n\n\
Or send a photo with the caption /draw <description>"
        }
    }
}

/// `/draw` and `/svg` typed as text: generation without reference photos.
pub async fn generate_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    mode: GenerationMode,
    prompt: Option<String>,
) -> Result<()> {
    let Some(prompt) = prompt
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        bot.send_message(message.chat.id, usage_text(mode))
            .reply_parameters(ReplyParameters::new(message.id))
            .await?;
        return Ok(());
    };

    let target = ReplyTarget {
        chat_id: message.chat.id,
        message_id: message.id,
    };
    state
        .albums
        .dispatcher()
        .dispatch_prompt(target, message.from.as_ref().map(|user| user.id), mode, prompt)
        .await
}

pub async fn selection_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    bot.answer_callback_query(query.id.clone()).await?;
    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    let Some(message) = query.message.as_ref() else {
        return Ok(());
    };
    let user = query.from.id;

    if let Some(key) = data.strip_prefix(MODEL_CALLBACK_PREFIX) {
        let Some(model) = state.sessions.select_model(user, key) else {
            return Ok(());
        };
        info!(user = user.0, model = model.id, "model selected");
        bot.edit_message_text(
            message.chat().id,
            message.id(),
            format!("✅ Model: {}\nHistory cleared.", model.label),
        )
        .reply_markup(model_keyboard(model.key))
        .await?;
        return Ok(());
    }

    if let Some(key) = data.strip_prefix(SIZE_CALLBACK_PREFIX) {
        let Some(size) = state.sessions.select_size(user, key) else {
            return Ok(());
        };
        info!(user = user.0, size = size.key, "size preset selected");
        bot.edit_message_text(
            message.chat().id,
            message.id(),
            format!("✅ Label size: {} ({})", size.label, size.describe()),
        )
        .reply_markup(size_keyboard(size.key))
        .await?;
    }

    Ok(())
}
