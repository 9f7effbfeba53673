//! In-memory stand-ins for Telegram and Gemini used by the album tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use teloxide::types::{ChatId, FileId, MessageId, UserId};

use super::dispatcher::{MediaFetcher, ReplyPayload, ReplySink, StatusHandle};
use super::{AlbumAggregator, AlbumDispatcher, AlbumKey, MediaEvent, MediaItem, ReplyTarget};
use crate::llm::{GenerationError, GenerationOutput, GenerationRequest, ImageGenerator};
use crate::state::SessionStore;

pub const DEFAULT_PROMPT: &str = "default album prompt";
const CHAT: ChatId = ChatId(100);

pub fn media_item(content: &str, caption: Option<&str>, message_id: i32) -> MediaItem {
    MediaItem {
        content: FileId(content.to_string()),
        caption: caption.map(str::to_string),
        sender: Some(UserId(1)),
        origin: ReplyTarget {
            chat_id: CHAT,
            message_id: MessageId(message_id),
        },
    }
}

pub fn photo_event(album: &str, content: &str, caption: Option<&str>, message_id: i32) -> MediaEvent {
    let item = media_item(content, caption, message_id);
    MediaEvent {
        album: Some(AlbumKey::new(album)),
        content: item.content,
        caption: item.caption,
        sender: item.sender,
        origin: item.origin,
    }
}

/// Returns the file id's bytes as the file content.
#[derive(Default)]
pub struct FakeFetcher {
    fetched: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeFetcher {
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    pub fn fail_on(&self, content: &str) {
        self.failing.lock().insert(content.to_string());
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, content: &FileId) -> Result<Vec<u8>> {
        if self.failing.lock().contains(&content.0) {
            return Err(anyhow!("download of {} failed", content.0));
        }
        self.fetched.lock().push(content.0.clone());
        Ok(content.0.as_bytes().to_vec())
    }
}

pub struct FakeGenerator {
    requests: Mutex<Vec<GenerationRequest>>,
    outcome: Mutex<Option<Result<GenerationOutput, GenerationError>>>,
    panics: Mutex<bool>,
}

impl FakeGenerator {
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn panic_on_generate(&self) {
        *self.panics.lock() = true;
    }

    fn next_outcome(&self) -> Result<GenerationOutput, GenerationError> {
        let outcome = self.outcome.lock();
        match outcome.as_ref() {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(GenerationError::Http { status, message })) => Err(GenerationError::Http {
                status: *status,
                message: message.clone(),
            }),
            Some(Err(GenerationError::Transport(detail))) => {
                Err(GenerationError::Transport(detail.clone()))
            }
            Some(Err(GenerationError::MalformedResponse(detail))) => {
                Err(GenerationError::MalformedResponse(detail.clone()))
            }
            Some(Err(GenerationError::Other(err))) => {
                Err(GenerationError::Other(anyhow!("{err}")))
            }
            None => Err(GenerationError::Other(anyhow!("no outcome configured"))),
        }
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        self.requests.lock().push(request);
        if *self.panics.lock() {
            panic!("generator blew up");
        }
        self.next_outcome()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Posted { target: ReplyTarget, text: String },
    StatusUpdated(String),
    StatusDeleted,
    Delivered(ReplyTarget, ReplyPayload),
}

#[derive(Default)]
pub struct FakeSink {
    events: Mutex<Vec<SinkEvent>>,
    released: Mutex<Vec<MessageId>>,
    status_fails: Mutex<bool>,
    delivery_fails: Mutex<bool>,
}

impl FakeSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    pub fn deliveries(&self) -> Vec<(ReplyTarget, ReplyPayload)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Delivered(target, payload) => Some((target, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn status_updates(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::StatusUpdated(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn fail_status(&self) {
        *self.status_fails.lock() = true;
    }

    /// Rejects every non-text delivery, like Telegram refusing an upload.
    pub fn fail_delivery(&self) {
        *self.delivery_fails.lock() = true;
    }

    pub fn released(&self) -> Vec<MessageId> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl ReplySink for FakeSink {
    async fn post_status(&self, target: &ReplyTarget, text: &str) -> Result<StatusHandle> {
        if *self.status_fails.lock() {
            return Err(anyhow!("status message rejected"));
        }
        self.events.lock().push(SinkEvent::Posted {
            target: *target,
            text: text.to_string(),
        });
        Ok(StatusHandle {
            chat_id: target.chat_id,
            message_id: MessageId(target.message_id.0 + 1000),
        })
    }

    async fn update_status(&self, _status: &StatusHandle, text: &str) -> Result<()> {
        self.events
            .lock()
            .push(SinkEvent::StatusUpdated(text.to_string()));
        Ok(())
    }

    async fn delete_status(&self, _status: &StatusHandle) -> Result<()> {
        self.events.lock().push(SinkEvent::StatusDeleted);
        Ok(())
    }

    async fn deliver(&self, target: &ReplyTarget, payload: ReplyPayload) -> Result<()> {
        if *self.delivery_fails.lock() && !matches!(payload, ReplyPayload::Text(_)) {
            return Err(anyhow!("upload rejected: PHOTO_INVALID_DIMENSIONS"));
        }
        self.events
            .lock()
            .push(SinkEvent::Delivered(*target, payload));
        Ok(())
    }

    fn release_status(&self, status: &StatusHandle) {
        self.released.lock().push(status.message_id);
    }
}

pub struct Fixture {
    pub fetcher: Arc<FakeFetcher>,
    pub generator: Arc<FakeGenerator>,
    pub sink: Arc<FakeSink>,
    pub sessions: SessionStore,
}

impl Fixture {
    pub fn new(outcome: Result<GenerationOutput, GenerationError>) -> Self {
        Fixture {
            fetcher: Arc::new(FakeFetcher::default()),
            generator: Arc::new(FakeGenerator {
                requests: Mutex::new(Vec::new()),
                outcome: Mutex::new(Some(outcome)),
                panics: Mutex::new(false),
            }),
            sink: Arc::new(FakeSink::default()),
            sessions: SessionStore::new(20),
        }
    }

    pub fn dispatcher(&self) -> AlbumDispatcher {
        AlbumDispatcher::new(
            self.fetcher.clone(),
            self.generator.clone(),
            self.sink.clone(),
            self.sessions.clone(),
            DEFAULT_PROMPT,
        )
    }

    pub fn aggregator(&self, debounce: Duration) -> AlbumAggregator {
        AlbumAggregator::new(self.dispatcher(), debounce)
    }
}
