use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::types::{ChatId, FileId, MessageId, UserId};
use tracing::{debug, error, info, warn};

use super::mode::{classify_caption, GenerationMode};
use super::{AlbumKey, MediaBuffer, MediaItem, ReplyTarget};
use crate::llm::{GenerationError, GenerationOutput, GenerationRequest, ImageGenerator};
use crate::state::SessionStore;
use crate::utils::timing::DispatchTimer;

const CAPTION_LIMIT: usize = 1000;
pub const SVG_FILE_NAME: &str = "label.svg";

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, content: &FileId) -> Result<Vec<u8>>;
}

/// A status message posted while a request is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusHandle {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPayload {
    Text(String),
    Document {
        bytes: Vec<u8>,
        file_name: String,
        caption: String,
    },
    Photo {
        bytes: Vec<u8>,
        caption: String,
    },
}

#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn post_status(&self, target: &ReplyTarget, text: &str) -> Result<StatusHandle>;
    async fn update_status(&self, status: &StatusHandle, text: &str) -> Result<()>;
    async fn delete_status(&self, status: &StatusHandle) -> Result<()>;
    async fn deliver(&self, target: &ReplyTarget, payload: ReplyPayload) -> Result<()>;

    /// Drops any local resources tied to a status message. Called exactly once
    /// per posted status, even if the dispatch unwinds.
    fn release_status(&self, _status: &StatusHandle) {}
}

/// Releases a posted status message when the dispatch ends, however it ends.
struct StatusGuard<'a> {
    sink: &'a dyn ReplySink,
    handle: StatusHandle,
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.sink.release_status(&self.handle);
    }
}

struct GenerationJob {
    source: &'static str,
    target: ReplyTarget,
    sender: Option<UserId>,
    mode: GenerationMode,
    prompt: String,
    contents: Vec<FileId>,
}

fn truncate_caption(text: String) -> String {
    if text.chars().count() <= CAPTION_LIMIT {
        return text;
    }
    let mut truncated: String = text.chars().take(CAPTION_LIMIT - 1).collect();
    truncated.push('…');
    truncated
}

fn build_payload(output: GenerationOutput, prompt: &str) -> ReplyPayload {
    match output {
        GenerationOutput::Svg(document) => ReplyPayload::Document {
            bytes: document.into_bytes(),
            file_name: SVG_FILE_NAME.to_string(),
            caption: truncate_caption(format!("🏷 {prompt}")),
        },
        GenerationOutput::Raster(bytes) => ReplyPayload::Photo {
            bytes,
            caption: truncate_caption(format!("🖼 {prompt}")),
        },
    }
}

/// Turns buffered album items (or a bare prompt) into one generation request
/// and reports the outcome back to the chat.
pub struct AlbumDispatcher {
    buffer: MediaBuffer,
    fetcher: Arc<dyn MediaFetcher>,
    generator: Arc<dyn ImageGenerator>,
    sink: Arc<dyn ReplySink>,
    sessions: SessionStore,
    default_prompt: String,
}

impl AlbumDispatcher {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        generator: Arc<dyn ImageGenerator>,
        sink: Arc<dyn ReplySink>,
        sessions: SessionStore,
        default_prompt: impl Into<String>,
    ) -> Self {
        AlbumDispatcher {
            buffer: MediaBuffer::new(),
            fetcher,
            generator,
            sink,
            sessions,
            default_prompt: default_prompt.into(),
        }
    }

    pub fn buffer(&self) -> &MediaBuffer {
        &self.buffer
    }

    /// Drains `key` and dispatches whatever was buffered. A key that was
    /// already drained is a no-op.
    pub async fn flush(&self, key: &AlbumKey) -> Result<()> {
        let items = self.buffer.drain(key);
        if items.is_empty() {
            debug!(album = %key, "album already drained");
            return Ok(());
        }
        info!(album = %key, items = items.len(), "album flushed");
        self.dispatch_items(items).await
    }

    /// The first item's caption, sender and message speak for the whole set.
    pub async fn dispatch_items(&self, items: Vec<MediaItem>) -> Result<()> {
        let Some(first) = items.first() else {
            return Ok(());
        };
        let (mode, prompt) = classify_caption(first.caption.as_deref(), &self.default_prompt);
        let job = GenerationJob {
            source: if items.len() > 1 { "album" } else { "photo" },
            target: first.origin,
            sender: first.sender,
            mode,
            prompt,
            contents: items.iter().map(|item| item.content.clone()).collect(),
        };
        self.run(job).await
    }

    /// Generation from a text command, without reference images.
    pub async fn dispatch_prompt(
        &self,
        target: ReplyTarget,
        sender: Option<UserId>,
        mode: GenerationMode,
        prompt: String,
    ) -> Result<()> {
        let job = GenerationJob {
            source: "command",
            target,
            sender,
            mode,
            prompt,
            contents: Vec::new(),
        };
        self.run(job).await
    }

    async fn run(&self, job: GenerationJob) -> Result<()> {
        let mut timer = DispatchTimer::start(
            job.source,
            job.mode.label(),
            job.target.chat_id.0,
            job.target.message_id.0,
            job.contents.len(),
        );

        let status = match self.sink.post_status(&job.target, job.mode.status_text()).await {
            Ok(handle) => Some(StatusGuard {
                sink: self.sink.as_ref(),
                handle,
            }),
            Err(err) => {
                warn!("failed to post status message: {err}");
                None
            }
        };
        let status_handle = status.as_ref().map(|guard| &guard.handle);

        match self.produce(&job).await {
            Ok(output) => {
                let payload = build_payload(output, &job.prompt);
                match self.sink.deliver(&job.target, payload).await {
                    Ok(()) => {
                        if let Some(handle) = status_handle {
                            if let Err(err) = self.sink.delete_status(handle).await {
                                warn!("failed to delete status message: {err}");
                            }
                        }
                    }
                    Err(err) => {
                        error!(mode = job.mode.label(), "failed to deliver generation result: {err:?}");
                        timer.mark_status("delivery_failed", Some(err.to_string()));
                        let message = GenerationError::Other(err).user_message();
                        self.report(status_handle, &job.target, &message).await;
                    }
                }
            }
            Err(err) => {
                match &err {
                    GenerationError::Other(inner) => {
                        error!(mode = job.mode.label(), "generation failed: {inner:?}")
                    }
                    _ => warn!(mode = job.mode.label(), "generation failed: {err}"),
                }
                timer.mark_status("error", Some(err.to_string()));
                self.report(status_handle, &job.target, &err.user_message())
                    .await;
            }
        }

        timer.log_completed();
        Ok(())
    }

    async fn produce(&self, job: &GenerationJob) -> Result<GenerationOutput, GenerationError> {
        let mut images = Vec::with_capacity(job.contents.len());
        for content in &job.contents {
            images.push(self.fetcher.fetch(content).await?);
        }

        let settings = self.sessions.settings_for(job.sender);
        let request = GenerationRequest {
            mode: job.mode,
            prompt: job.prompt.clone(),
            images,
            model_id: settings.model.id.to_string(),
            size: *settings.size,
        };
        self.generator.generate(request).await
    }

    async fn report(&self, status: Option<&StatusHandle>, target: &ReplyTarget, text: &str) {
        let result = match status {
            Some(status) => self.sink.update_status(status, text).await,
            None => self.sink.deliver(target, ReplyPayload::Text(text.to_string())).await,
        };
        if let Err(err) = result {
            warn!("failed to report generation error: {err}");
        }
    }
}
