use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use tracing::warn;

use crate::utils::http::get_http_client;

const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const MEDIA_DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

/// Mime type for an image Gemini will accept inline, falling back to JPEG
/// (what Telegram re-encodes photos to).
pub fn image_mime_type(data: &[u8]) -> String {
    match detect_mime_type(data).as_deref() {
        Some("image/jpg") => "image/jpeg".to_string(),
        Some(mime) if mime.starts_with("image/") => mime.to_string(),
        _ => "image/jpeg".to_string(),
    }
}

pub(crate) fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt)
}

/// Downloads a Telegram file. `label` is what gets logged in place of the URL,
/// which embeds the bot token.
pub async fn download_media(url: &str, label: &str) -> Result<Vec<u8>> {
    let client = get_http_client();
    for attempt in 0..MEDIA_DOWNLOAD_MAX_ATTEMPTS {
        let last_attempt = attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS;
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch media {label}: timeout={} connect={} status={:?} attempt={}/{}",
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if !should_retry_error(&err) || last_attempt {
                    return Err(anyhow!("media download failed for {label}: {}", err.without_url()));
                }
                tokio::time::sleep(retry_delay(attempt)).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Media download failed for {label} with status {}: {}",
                status,
                truncate_for_log(&body, MEDIA_DOWNLOAD_ERROR_BODY_LIMIT)
            );
            if !should_retry_status(status) || last_attempt {
                return Err(anyhow!("media download failed for {label} with status {status}"));
            }
            tokio::time::sleep(retry_delay(attempt)).await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(err) => {
                warn!(
                    "Failed to read media bytes {label} (attempt={}/{})",
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if last_attempt {
                    return Err(anyhow!("reading media {label} failed: {}", err.without_url()));
                }
                tokio::time::sleep(retry_delay(attempt)).await;
            }
        }
    }

    Err(anyhow!("media download for {label} gave up"))
}
