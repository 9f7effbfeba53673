use std::error::Error;
use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod album;
mod config;
mod handlers;
mod llm;
mod state;
mod utils;

use album::{AlbumAggregator, AlbumDispatcher, GenerationMode};
use config::{log_level_from_env, Config, CONFIG};
use handlers::commands::{MODEL_CALLBACK_PREFIX, SIZE_CALLBACK_PREFIX};
use handlers::media::TelegramMediaFetcher;
use handlers::responses::TelegramReplySink;
use handlers::{chat, commands, media};
use llm::GeminiClient;
use state::{AppState, SessionStore};
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Model,
    Size,
    Clear,
    Draw(String),
    Svg(String),
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let _guards = init_logging(&log_level_from_env());
    // Surface missing credentials as an error instead of a panic inside CONFIG.
    if let Err(err) = Config::load() {
        error!("{err}");
        return Err(err.into());
    }

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!(
        image_model = %CONFIG.gemini_image_model,
        debounce_ms = CONFIG.album_debounce_ms,
        "Starting Gemini label bot"
    );

    let sessions = SessionStore::new(CONFIG.history_limit);
    let gemini = Arc::new(GeminiClient::from_config(&CONFIG));
    let dispatcher = AlbumDispatcher::new(
        Arc::new(TelegramMediaFetcher::new(bot.clone())),
        gemini.clone(),
        Arc::new(TelegramReplySink::new(
            bot.clone(),
            CONFIG.telegram_chunk_length,
        )),
        sessions.clone(),
        CONFIG.album_default_prompt.clone(),
    );
    let albums = AlbumAggregator::new(dispatcher, CONFIG.album_debounce());
    let state = AppState::new(gemini, sessions, albums);

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo))
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
        .endpoint(ignore_message);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    fn optional_arg(arg: String) -> Option<String> {
        if arg.trim().is_empty() {
            None
        } else {
            Some(arg)
        }
    }

    match command {
        Command::Start | Command::Help => commands::start_handler(bot, state, message).await?,
        Command::Model => commands::model_handler(bot, state, message).await?,
        Command::Size => commands::size_handler(bot, state, message).await?,
        Command::Clear => commands::clear_handler(bot, state, message).await?,
        Command::Draw(arg) => {
            let arg = optional_arg(arg);
            tokio::spawn(async move {
                if let Err(err) = commands::generate_handler(
                    bot,
                    state,
                    message,
                    GenerationMode::RasterVisualization,
                    arg,
                )
                .await
                {
                    error!("draw handler failed: {err}");
                }
            });
        }
        Command::Svg(arg) => {
            let arg = optional_arg(arg);
            tokio::spawn(async move {
                if let Err(err) = commands::generate_handler(
                    bot,
                    state,
                    message,
                    GenerationMode::VectorLabel,
                    arg,
                )
                .await
                {
                    error!("svg handler failed: {err}");
                }
            });
        }
    }
    Ok(())
}

async fn handle_photo(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    media::handle_photo(bot, state, message);
    Ok(())
}

async fn handle_text(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    if message
        .text()
        .map(|text| text.trim_start().starts_with('/'))
        .unwrap_or(false)
    {
        return Ok(());
    }
    tokio::spawn(async move {
        if let Err(err) = chat::text_handler(bot, state, message).await {
            error!("text handler failed: {err}");
        }
    });
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> HandlerResult {
    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    if data.starts_with(MODEL_CALLBACK_PREFIX) || data.starts_with(SIZE_CALLBACK_PREFIX) {
        tokio::spawn(async move {
            if let Err(err) = commands::selection_callback(bot, state, query).await {
                error!("selection callback failed: {err}");
            }
        });
    }
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
