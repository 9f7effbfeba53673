use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, MessageId, ReplyParameters};

use crate::album::{ReplyPayload, ReplySink, ReplyTarget, StatusHandle};
use crate::utils::telegram::{chunk_text, start_chat_action_heartbeat, ChatActionHeartbeat};

pub async fn send_chunked_reply(
    bot: &Bot,
    chat_id: ChatId,
    reply_to: MessageId,
    text: &str,
    chunk_length: usize,
) -> Result<()> {
    for chunk in chunk_text(text, chunk_length) {
        bot.send_message(chat_id, chunk)
            .reply_parameters(ReplyParameters::new(reply_to))
            .await?;
    }
    Ok(())
}

/// Delivers generation results through the Bot API. Sends are not retried.
pub struct TelegramReplySink {
    bot: Bot,
    chunk_length: usize,
    heartbeats: Mutex<HashMap<(ChatId, MessageId), ChatActionHeartbeat>>,
}

impl TelegramReplySink {
    pub fn new(bot: Bot, chunk_length: usize) -> Self {
        TelegramReplySink {
            bot,
            chunk_length,
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    fn stop_heartbeat(&self, status: &StatusHandle) {
        self.heartbeats
            .lock()
            .remove(&(status.chat_id, status.message_id));
    }
}

#[async_trait]
impl ReplySink for TelegramReplySink {
    async fn post_status(&self, target: &ReplyTarget, text: &str) -> Result<StatusHandle> {
        let message = self
            .bot
            .send_message(target.chat_id, text.to_string())
            .reply_parameters(ReplyParameters::new(target.message_id))
            .await?;
        let heartbeat = start_chat_action_heartbeat(
            self.bot.clone(),
            message.chat.id,
            ChatAction::UploadPhoto,
        );
        self.heartbeats
            .lock()
            .insert((message.chat.id, message.id), heartbeat);
        Ok(StatusHandle {
            chat_id: message.chat.id,
            message_id: message.id,
        })
    }

    async fn update_status(&self, status: &StatusHandle, text: &str) -> Result<()> {
        self.stop_heartbeat(status);
        self.bot
            .edit_message_text(status.chat_id, status.message_id, text.to_string())
            .await?;
        Ok(())
    }

    async fn delete_status(&self, status: &StatusHandle) -> Result<()> {
        self.stop_heartbeat(status);
        self.bot
            .delete_message(status.chat_id, status.message_id)
            .await?;
        Ok(())
    }

    async fn deliver(&self, target: &ReplyTarget, payload: ReplyPayload) -> Result<()> {
        match payload {
            ReplyPayload::Text(text) => {
                send_chunked_reply(
                    &self.bot,
                    target.chat_id,
                    target.message_id,
                    &text,
                    self.chunk_length,
                )
                .await?;
            }
            ReplyPayload::Document {
                bytes,
                file_name,
                caption,
            } => {
                self.bot
                    .send_document(target.chat_id, InputFile::memory(bytes).file_name(file_name))
                    .caption(caption)
                    .reply_parameters(ReplyParameters::new(target.message_id))
                    .await?;
            }
            ReplyPayload::Photo { bytes, caption } => {
                self.bot
                    .send_photo(target.chat_id, InputFile::memory(bytes))
                    .caption(caption)
                    .reply_parameters(ReplyParameters::new(target.message_id))
                    .await?;
            }
        }
        Ok(())
    }

    fn release_status(&self, status: &StatusHandle) {
        self.stop_heartbeat(status);
    }
}
