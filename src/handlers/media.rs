use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::error;

use crate::album::mode::has_generation_prefix;
use crate::album::{AlbumKey, MediaEvent, MediaFetcher, ReplyTarget};
use crate::handlers::chat;
use crate::llm::media::download_media;
use crate::state::AppState;

pub async fn get_file_url(bot: &Bot, file_id: &FileId) -> Result<(String, String)> {
    let file = bot.get_file(file_id.clone()).await?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file.path
    );
    Ok((url, file.path))
}

pub async fn download_file(bot: &Bot, file_id: &FileId) -> Result<Vec<u8>> {
    let (url, path) = get_file_url(bot, file_id).await?;
    download_media(&url, &path).await
}

pub struct TelegramMediaFetcher {
    bot: Bot,
}

impl TelegramMediaFetcher {
    pub fn new(bot: Bot) -> Self {
        TelegramMediaFetcher { bot }
    }
}

#[async_trait]
impl MediaFetcher for TelegramMediaFetcher {
    async fn fetch(&self, content: &FileId) -> Result<Vec<u8>> {
        download_file(&self.bot, content).await
    }
}

/// Builds the album entry-point event for a photo message, using the
/// largest available size.
pub fn media_event(message: &Message) -> Option<MediaEvent> {
    let photo = message.photo()?.last()?;
    Some(MediaEvent {
        album: message.media_group_id().map(AlbumKey::from),
        content: photo.file.id.clone(),
        caption: message.caption().map(str::to_string),
        sender: message.from.as_ref().map(|user| user.id),
        origin: ReplyTarget {
            chat_id: message.chat.id,
            message_id: message.id,
        },
    })
}

/// Album members and captions asking for generation go to the album
/// aggregator; any other photo is a chat question about the picture.
///
/// Buffering happens inline so album items keep their arrival order.
pub fn handle_photo(bot: Bot, state: AppState, message: Message) {
    let Some(event) = media_event(&message) else {
        return;
    };

    let wants_generation = event.album.is_some()
        || event
            .caption
            .as_deref()
            .map(has_generation_prefix)
            .unwrap_or(false);
    if wants_generation {
        state.albums.on_media(event);
        return;
    }

    tokio::spawn(async move {
        if let Err(err) = chat::photo_handler(bot, state, message, event.content).await {
            error!("photo chat handler failed: {err}");
        }
    });
}
