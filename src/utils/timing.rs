use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

/// Timing record for one generation dispatch, written to the `bot.timing`
/// target when it completes or is dropped.
#[derive(Debug)]
pub struct DispatchTimer {
    source: String,
    mode: &'static str,
    chat_id: i64,
    message_id: i32,
    images: usize,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl DispatchTimer {
    pub fn start(source: &str, mode: &'static str, chat_id: i64, message_id: i32, images: usize) -> Self {
        let timer = DispatchTimer {
            source: source.to_string(),
            mode,
            chat_id,
            message_id,
            images,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        };
        info!(
            target: "bot.timing",
            "event=dispatch_started source={} mode={} chat_id={} message_id={} images={} started_at={}",
            timer.source,
            timer.mode,
            timer.chat_id,
            timer.message_id,
            timer.images,
            timer.started_at.to_rfc3339()
        );
        timer
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "bot.timing",
            "event=dispatch_completed source={} mode={} chat_id={} message_id={} images={} completed_at={} duration_s={:.3} status={} detail={}",
            self.source,
            self.mode,
            self.chat_id,
            self.message_id,
            self.images,
            Utc::now().to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for DispatchTimer {
    fn drop(&mut self) {
        if !self.completed {
            self.mark_status("aborted", None);
            self.log_completed();
        }
    }
}

pub async fn log_llm_timing<T, E, F, Fut>(
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "bot.timing",
        "event=llm_request provider=gemini model={} operation={} started_at={} metadata={}",
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    info!(
        target: "bot.timing",
        "event=llm_response provider=gemini model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        model,
        operation,
        Utc::now().to_rfc3339(),
        started_perf.elapsed().as_secs_f64(),
        status,
        metadata_text
    );

    result
}
