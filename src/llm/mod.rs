pub mod gemini;
pub mod media;
pub mod svg;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::album::GenerationMode;
use crate::config::SizePreset;

pub use gemini::{ChatPart, ChatTurn, GeminiClient};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Gemini request failed with status {status}: {message}")]
    Http { status: StatusCode, message: String },
    #[error("Gemini request failed: {0}")]
    Transport(String),
    #[error("Gemini response is missing {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GenerationError {
    /// The single message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Http { status, .. } => {
                let hint = match status.as_u16() {
                    429 => "rate limit reached, try again in a minute",
                    400 | 422 => "the request was rejected, try a different prompt",
                    401 | 403 => "the API key was refused",
                    404 => "the selected model is unavailable",
                    code if code >= 500 => "Gemini is having trouble right now",
                    _ => "unexpected response",
                };
                format!("❌ Gemini error: {} ({hint})", status.as_u16())
            }
            GenerationError::Transport(_) => {
                "❌ Could not reach Gemini. Try again later.".to_string()
            }
            GenerationError::MalformedResponse(_) => {
                "⚠️ Gemini returned nothing usable. Try rephrasing the description.".to_string()
            }
            GenerationError::Other(_) => "❌ Something went wrong, try again later.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub mode: GenerationMode,
    pub prompt: String,
    pub images: Vec<Vec<u8>>,
    pub model_id: String,
    pub size: SizePreset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutput {
    Svg(String),
    Raster(Vec<u8>),
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError>;
}
