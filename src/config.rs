use std::env;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOption {
    pub key: &'static str,
    pub id: &'static str,
    pub label: &'static str,
}

pub const MODELS: [ModelOption; 3] = [
    ModelOption {
        key: "flash",
        id: "gemini-2.5-flash",
        label: "⚡ Gemini 2.5 Flash — fast and cheap",
    },
    ModelOption {
        key: "pro",
        id: "gemini-2.5-pro",
        label: "✨ Gemini 2.5 Pro — smarter",
    },
    ModelOption {
        key: "pro3",
        id: "gemini-3-pro-preview",
        label: "🚀 Gemini 3 Pro — best quality",
    },
];
pub const DEFAULT_MODEL_KEY: &str = "pro";

/// Aspect ratios accepted by `generationConfig.imageConfig.aspectRatio`.
const SUPPORTED_ASPECT_RATIOS: [(&str, u32, u32); 10] = [
    ("1:1", 1, 1),
    ("2:3", 2, 3),
    ("3:2", 3, 2),
    ("3:4", 3, 4),
    ("4:3", 4, 3),
    ("4:5", 4, 5),
    ("5:4", 5, 4),
    ("9:16", 9, 16),
    ("16:9", 16, 9),
    ("21:9", 21, 9),
];

/// A physical print size for generated labels, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePreset {
    pub key: &'static str,
    pub label: &'static str,
    pub width_mm: u32,
    pub height_mm: u32,
}

impl SizePreset {
    /// The supported aspect ratio closest to this preset's proportions.
    pub fn aspect_ratio(&self) -> &'static str {
        let target = self.width_mm as f64 / self.height_mm.max(1) as f64;
        let mut best = SUPPORTED_ASPECT_RATIOS[0];
        let mut best_distance = f64::MAX;
        for candidate in SUPPORTED_ASPECT_RATIOS {
            let ratio = candidate.1 as f64 / candidate.2 as f64;
            let distance = (ratio.ln() - target.ln()).abs();
            if distance < best_distance {
                best = candidate;
                best_distance = distance;
            }
        }
        best.0
    }

    pub fn describe(&self) -> String {
        format!("{} × {} mm", self.width_mm, self.height_mm)
    }
}

pub const SIZE_PRESETS: [SizePreset; 5] = [
    SizePreset {
        key: "label-a6",
        label: "🏷 A6 label",
        width_mm: 105,
        height_mm: 148,
    },
    SizePreset {
        key: "label-a5",
        label: "📄 A5 label",
        width_mm: 148,
        height_mm: 210,
    },
    SizePreset {
        key: "square",
        label: "⬛ Square",
        width_mm: 100,
        height_mm: 100,
    },
    SizePreset {
        key: "bottle",
        label: "🧴 Bottle wrap",
        width_mm: 60,
        height_mm: 180,
    },
    SizePreset {
        key: "wide",
        label: "↔️ Wide",
        width_mm: 200,
        height_mm: 100,
    },
];
pub const DEFAULT_SIZE_KEY: &str = "label-a6";

pub fn find_model(key: &str) -> Option<&'static ModelOption> {
    MODELS.iter().find(|model| model.key == key)
}

pub fn default_model() -> &'static ModelOption {
    find_model(DEFAULT_MODEL_KEY).unwrap_or(&MODELS[0])
}

pub fn find_size_preset(key: &str) -> Option<&'static SizePreset> {
    SIZE_PRESETS.iter().find(|preset| preset.key == key)
}

pub fn default_size_preset() -> &'static SizePreset {
    find_size_preset(DEFAULT_SIZE_KEY).unwrap_or(&SIZE_PRESETS[0])
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_image_model: String,
    pub gemini_max_output_tokens: u32,
    pub gemini_timeout_seconds: u64,
    pub album_debounce_ms: u64,
    pub album_default_prompt: String,
    pub history_limit: usize,
    pub telegram_chunk_length: usize,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn first_non_empty_env(names: &[&str]) -> String {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

fn checked_history_limit(value: usize) -> usize {
    if value == 0 {
        warn!("HISTORY_LIMIT=0 would drop every turn; using 20");
        return 20;
    }
    value
}

/// Read on its own so logging can start before the rest of the config, whose
/// warnings would otherwise be lost.
pub fn log_level_from_env() -> String {
    env_string("LOG_LEVEL", "info").to_lowercase()
}

fn normalize_base_url(value: String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "https://generativelanguage.googleapis.com/v1beta".to_string();
    }
    trimmed.to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let bot_token = first_non_empty_env(&["BOT_TOKEN", "TELEGRAM_TOKEN"]);
        if bot_token.is_empty() {
            return Err(anyhow::anyhow!("BOT_TOKEN (or TELEGRAM_TOKEN) is required"));
        }

        let gemini_api_key = env_string("GEMINI_API_KEY", "").trim().to_string();
        if gemini_api_key.is_empty() {
            return Err(anyhow::anyhow!("GEMINI_API_KEY is required"));
        }

        let history_limit = checked_history_limit(env_usize("HISTORY_LIMIT", 20));

        let mut album_default_prompt = env_string(
            "ALBUM_DEFAULT_PROMPT",
            "Create a product visualization from these photos.",
        )
        .trim()
        .to_string();
        if album_default_prompt.is_empty() {
            album_default_prompt = "Create a product visualization from these photos.".to_string();
        }

        Ok(Config {
            bot_token,
            gemini_api_key,
            gemini_base_url: normalize_base_url(env_string(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            )),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-3-pro-image-preview"),
            gemini_max_output_tokens: env_u32("GEMINI_MAX_OUTPUT_TOKENS", 8192),
            gemini_timeout_seconds: env_u64("GEMINI_TIMEOUT_SECONDS", 120).max(1),
            album_debounce_ms: env_u64("ALBUM_DEBOUNCE_MS", 1500),
            album_default_prompt,
            history_limit,
            telegram_chunk_length: env_usize("TELEGRAM_CHUNK_LENGTH", 4000).clamp(1, 4096),
        })
    }

    pub fn album_debounce(&self) -> Duration {
        Duration::from_millis(self.album_debounce_ms)
    }
}
