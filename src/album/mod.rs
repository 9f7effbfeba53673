//! Album aggregation: photos posted as one media group are buffered until the
//! group goes quiet, then generated from in a single request.

pub mod buffer;
pub mod dispatcher;
pub mod mode;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use teloxide::types::{ChatId, FileId, MediaGroupId, MessageId, UserId};
use tracing::{debug, error};

pub use buffer::MediaBuffer;
pub use dispatcher::{AlbumDispatcher, MediaFetcher, ReplyPayload, ReplySink, StatusHandle};
pub use mode::GenerationMode;
pub use scheduler::DebounceScheduler;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlbumKey(String);

#[cfg(test)]
impl AlbumKey {
    pub fn new(value: impl Into<String>) -> Self {
        AlbumKey(value.into())
    }
}

impl From<&MediaGroupId> for AlbumKey {
    fn from(id: &MediaGroupId) -> Self {
        AlbumKey(id.0.clone())
    }
}

impl fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a reply for an album goes: the chat and the message to thread under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub content: FileId,
    pub caption: Option<String>,
    pub sender: Option<UserId>,
    pub origin: ReplyTarget,
}

/// One inbound photo as seen by the platform adapter.
#[derive(Debug, Clone)]
pub struct MediaEvent {
    pub album: Option<AlbumKey>,
    pub content: FileId,
    pub caption: Option<String>,
    pub sender: Option<UserId>,
    pub origin: ReplyTarget,
}

impl MediaEvent {
    fn into_parts(self) -> (Option<AlbumKey>, MediaItem) {
        (
            self.album,
            MediaItem {
                content: self.content,
                caption: self.caption,
                sender: self.sender,
                origin: self.origin,
            },
        )
    }
}

/// Owns the buffer and the per-album flush registry for one running bot.
#[derive(Clone)]
pub struct AlbumAggregator {
    buffer: MediaBuffer,
    scheduler: DebounceScheduler<AlbumKey>,
    dispatcher: Arc<AlbumDispatcher>,
    debounce: Duration,
}

impl AlbumAggregator {
    pub fn new(dispatcher: AlbumDispatcher, debounce: Duration) -> Self {
        AlbumAggregator {
            buffer: dispatcher.buffer().clone(),
            scheduler: DebounceScheduler::new(),
            dispatcher: Arc::new(dispatcher),
            debounce,
        }
    }

    pub fn dispatcher(&self) -> &Arc<AlbumDispatcher> {
        &self.dispatcher
    }

    /// Entry point for every photo that should be generated from.
    ///
    /// Album members are buffered and the album's flush is re-armed; a photo
    /// outside any album is dispatched on its own right away.
    pub fn on_media(&self, event: MediaEvent) {
        let (album, item) = event.into_parts();
        let Some(key) = album else {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(err) = dispatcher.dispatch_items(vec![item]).await {
                    error!("single photo dispatch failed: {err:?}");
                }
            });
            return;
        };

        self.buffer.append(key.clone(), item);
        debug!(album = %key, buffered = self.buffer.len(&key), "album item buffered");

        let dispatcher = self.dispatcher.clone();
        let flush_key = key.clone();
        self.scheduler.arm(key, self.debounce, move || async move {
            dispatcher.flush(&flush_key).await
        });
    }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &DebounceScheduler<AlbumKey> {
        &self.scheduler
    }
}
