use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use teloxide::types::UserId;

use crate::album::AlbumAggregator;
use crate::config::{
    default_model, default_size_preset, find_model, find_size_preset, ModelOption, SizePreset,
};
use crate::llm::{ChatTurn, GeminiClient};

#[derive(Debug, Clone, PartialEq)]
pub struct UserSession {
    pub model: &'static ModelOption,
    pub size: &'static SizePreset,
    pub history: Vec<ChatTurn>,
}

impl Default for UserSession {
    fn default() -> Self {
        UserSession {
            model: default_model(),
            size: default_size_preset(),
            history: Vec::new(),
        }
    }
}

/// What a generation request should use for a given user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSettings {
    pub model: &'static ModelOption,
    pub size: &'static SizePreset,
}

/// Per-user model choice, size preset and chat history. In memory only.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<UserId, UserSession>>>,
    history_limit: usize,
}

impl SessionStore {
    pub fn new(history_limit: usize) -> Self {
        SessionStore {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            history_limit: history_limit.max(2),
        }
    }

    pub fn settings_for(&self, user: Option<UserId>) -> GenerationSettings {
        let sessions = self.sessions.lock();
        match user.and_then(|user| sessions.get(&user)) {
            Some(session) => GenerationSettings {
                model: session.model,
                size: session.size,
            },
            None => GenerationSettings {
                model: default_model(),
                size: default_size_preset(),
            },
        }
    }

    /// Switches the user's model. History is dropped because it was produced
    /// by a different model.
    pub fn select_model(&self, user: UserId, key: &str) -> Option<&'static ModelOption> {
        let model = find_model(key)?;
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(user).or_default();
        session.model = model;
        session.history.clear();
        Some(model)
    }

    pub fn select_size(&self, user: UserId, key: &str) -> Option<&'static SizePreset> {
        let size = find_size_preset(key)?;
        self.sessions.lock().entry(user).or_default().size = size;
        Some(size)
    }

    pub fn clear_history(&self, user: UserId) {
        if let Some(session) = self.sessions.lock().get_mut(&user) {
            session.history.clear();
        }
    }

    /// The conversation to send: stored history followed by `turn`.
    pub fn history_with(&self, user: Option<UserId>, turn: &ChatTurn) -> Vec<ChatTurn> {
        let mut history = user
            .and_then(|user| {
                self.sessions
                    .lock()
                    .get(&user)
                    .map(|session| session.history.clone())
            })
            .unwrap_or_default();
        history.push(turn.clone());
        history
    }

    /// Stores a completed exchange, keeping only the newest turns.
    pub fn record_exchange(&self, user: UserId, question: ChatTurn, answer: ChatTurn) {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(user).or_default();
        session.history.push(question);
        session.history.push(answer);
        let overflow = session.history.len().saturating_sub(self.history_limit);
        if overflow > 0 {
            // Drop whole exchanges so history always opens with a user turn.
            let overflow = overflow + overflow % 2;
            session.history.drain(..overflow.min(session.history.len()));
        }
    }

    #[cfg(test)]
    pub fn history_len(&self, user: UserId) -> usize {
        self.sessions
            .lock()
            .get(&user)
            .map(|session| session.history.len())
            .unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gemini: Arc<GeminiClient>,
    pub sessions: SessionStore,
    pub albums: AlbumAggregator,
}

impl AppState {
    pub fn new(gemini: Arc<GeminiClient>, sessions: SessionStore, albums: AlbumAggregator) -> Self {
        AppState {
            gemini,
            sessions,
            albums,
        }
    }
}
