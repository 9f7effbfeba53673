use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::album::GenerationMode;
use crate::config::{Config, SizePreset};
use crate::llm::media::{image_mime_type, truncate_for_log};
use crate::llm::svg::extract_svg_document;
use crate::llm::{GenerationError, GenerationOutput, GenerationRequest, ImageGenerator};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Other(Value),
}

impl ChatPart {
    pub fn text(text: impl Into<String>) -> Self {
        ChatPart::Text { text: text.into() }
    }

    pub fn image(bytes: &[u8]) -> Self {
        ChatPart::InlineData {
            inline_data: InlineData {
                mime_type: image_mime_type(bytes),
                data: general_purpose::STANDARD.encode(bytes),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub parts: Vec<ChatPart>,
}

impl ChatTurn {
    pub fn user(parts: Vec<ChatPart>) -> Self {
        ChatTurn {
            role: ChatRole::User,
            parts,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        ChatTurn {
            role: ChatRole::Model,
            parts: vec![ChatPart::text(text)],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<ChatPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

impl GeminiResponse {
    fn parts(&self) -> impl Iterator<Item = &ChatPart> {
        self.candidates
            .iter()
            .flatten()
            .filter_map(|candidate| candidate.content.as_ref())
            .filter_map(|content| content.parts.as_ref())
            .flatten()
    }

    fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts()
            .filter_map(|part| match part {
                ChatPart::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n").trim().to_string())
        }
    }

    fn first_image(&self) -> Option<Vec<u8>> {
        self.parts().find_map(|part| match part {
            ChatPart::InlineData { inline_data } if inline_data.mime_type.starts_with("image/") => {
                general_purpose::STANDARD.decode(&inline_data.data).ok()
            }
            _ => None,
        })
    }

    /// Explains why an expected part is missing, for logs and errors.
    fn missing(&self, what: &str) -> GenerationError {
        let mut detail = what.to_string();
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            detail.push_str(&format!(" (blocked: {reason})"));
        } else if let Some(reason) = self
            .candidates
            .iter()
            .flatten()
            .find_map(|candidate| candidate.finish_reason.as_deref())
        {
            detail.push_str(&format!(" (finish reason: {reason})"));
        }
        GenerationError::MalformedResponse(detail)
    }
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn summarize_payload(payload: &Value) -> Value {
    let mut summary = Map::new();
    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let turns: Vec<Value> = contents
            .iter()
            .map(|content| {
                let parts: Vec<Value> = content
                    .get("parts")
                    .and_then(|value| value.as_array())
                    .map(|parts| {
                        parts
                            .iter()
                            .map(|part| {
                                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                                    json!({ "text": truncate_for_log(text, 200) })
                                } else if let Some(data) = part.get("inlineData") {
                                    let data_len = data
                                        .get("data")
                                        .and_then(|v| v.as_str())
                                        .map(str::len)
                                        .unwrap_or(0);
                                    json!({ "inlineData": { "dataLen": data_len } })
                                } else {
                                    json!({ "unknownPart": true })
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                json!({ "role": content.get("role").cloned().unwrap_or(Value::Null), "parts": parts })
            })
            .collect();
        summary.insert("contents".to_string(), Value::Array(turns));
    }
    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }
    Value::Object(summary)
}

fn media_then_prompt(prompt: &str, images: &[Vec<u8>]) -> Vec<ChatPart> {
    let mut parts: Vec<ChatPart> = images.iter().map(|image| ChatPart::image(image)).collect();
    parts.push(ChatPart::text(prompt));
    parts
}

fn raster_instruction(has_images: bool, size: &SizePreset) -> String {
    let base = if has_images {
        "Use the attached product photos as reference and produce a polished marketing visualization of the product."
    } else {
        "Produce a polished marketing visualization based on the description."
    };
    format!(
        "{base} The product label is printed at {}. CRITICAL: respond with an image, NOT TEXT.",
        size.describe()
    )
}

fn svg_instruction(has_images: bool, size: &SizePreset) -> String {
    let reference = if has_images {
        " Use the attached photos as reference for the product, colours and existing branding."
    } else {
        ""
    };
    format!(
        "You are a packaging designer. Reply with exactly one standalone SVG document for a print-ready label.{reference} \
The root element must have width=\"{w}mm\" height=\"{h}mm\" viewBox=\"0 0 {w} {h}\". \
Use only vector shapes and live text; no embedded raster images, no scripts, no external references. \
Do not add explanations outside the SVG.",
        w = size.width_mm,
        h = size.height_mm,
    )
}

fn build_raster_payload(prompt: &str, images: &[Vec<u8>], size: &SizePreset) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": raster_instruction(!images.is_empty(), size) }] },
        "contents": [ChatTurn::user(media_then_prompt(prompt, images))],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
            "imageConfig": { "aspectRatio": size.aspect_ratio() },
        },
    })
}

fn build_svg_payload(
    prompt: &str,
    images: &[Vec<u8>],
    size: &SizePreset,
    max_output_tokens: u32,
) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": svg_instruction(!images.is_empty(), size) }] },
        "contents": [ChatTurn::user(media_then_prompt(prompt, images))],
        "generationConfig": { "maxOutputTokens": max_output_tokens },
    })
}

fn build_chat_payload(history: &[ChatTurn], max_output_tokens: u32) -> Value {
    json!({
        "contents": history,
        "generationConfig": { "maxOutputTokens": max_output_tokens },
    })
}

pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    image_model: String,
    max_output_tokens: u32,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        image_model: impl Into<String>,
        max_output_tokens: u32,
        timeout: Duration,
    ) -> Self {
        GeminiClient {
            http: get_http_client().clone(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            image_model: image_model.into(),
            max_output_tokens,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.gemini_api_key.clone(),
            config.gemini_base_url.clone(),
            config.gemini_image_model.clone(),
            config.gemini_max_output_tokens,
            Duration::from_secs(config.gemini_timeout_seconds),
        )
    }

    #[cfg(test)]
    fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    fn redact(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    async fn generate_content(
        &self,
        model: &str,
        payload: &Value,
    ) -> Result<GeminiResponse, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(target: "llm.gemini", model = model, payload = %summarize_payload(payload));
        }

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                let err_text = self.redact(&err.without_url().to_string());
                warn!(model = model, "Gemini request failed to send: {}", err_text);
                GenerationError::Transport(err_text)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!(
                model = model,
                "Gemini API error: status={}, body={}",
                status,
                self.redact(&body_summary)
            );
            return Err(GenerationError::Http {
                status,
                message: self.redact(&message.unwrap_or(body_summary)),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| GenerationError::Transport(self.redact(&err.without_url().to_string())))?;
        serde_json::from_str::<GeminiResponse>(&body).map_err(|err| {
            debug!(target: "llm.gemini", body = %truncate_for_log(&body, 4000));
            GenerationError::MalformedResponse(format!("a decodable body ({err})"))
        })
    }

    /// Continues a conversation; `history` ends with the newest user turn.
    pub async fn chat(&self, model_id: &str, history: &[ChatTurn]) -> Result<String, GenerationError> {
        let payload = build_chat_payload(history, self.max_output_tokens);
        log_llm_timing(
            model_id,
            "chat",
            Some(json!({ "turns": history.len() })),
            || async {
                let response = self.generate_content(model_id, &payload).await?;
                response.text().ok_or_else(|| response.missing("text"))
            },
        )
        .await
    }

    pub async fn generate_raster(
        &self,
        prompt: &str,
        images: &[Vec<u8>],
        size: &SizePreset,
    ) -> Result<Vec<u8>, GenerationError> {
        let payload = build_raster_payload(prompt, images, size);
        let model = self.image_model.as_str();
        log_llm_timing(
            model,
            "generate_raster",
            Some(json!({ "images": images.len(), "aspectRatio": size.aspect_ratio() })),
            || async {
                let response = self.generate_content(model, &payload).await?;
                response.first_image().ok_or_else(|| response.missing("image data"))
            },
        )
        .await
    }

    pub async fn generate_svg(
        &self,
        model_id: &str,
        prompt: &str,
        images: &[Vec<u8>],
        size: &SizePreset,
    ) -> Result<String, GenerationError> {
        let payload = build_svg_payload(prompt, images, size, self.max_output_tokens);
        log_llm_timing(
            model_id,
            "generate_svg",
            Some(json!({ "images": images.len(), "size": size.key })),
            || async {
                let response = self.generate_content(model_id, &payload).await?;
                let text = response.text().ok_or_else(|| response.missing("text"))?;
                extract_svg_document(&text)
                    .ok_or_else(|| GenerationError::MalformedResponse("an <svg> document".to_string()))
            },
        )
        .await
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        match request.mode {
            GenerationMode::VectorLabel => self
                .generate_svg(&request.model_id, &request.prompt, &request.images, &request.size)
                .await
                .map(GenerationOutput::Svg),
            GenerationMode::RasterVisualization => self
                .generate_raster(&request.prompt, &request.images, &request.size)
                .await
                .map(GenerationOutput::Raster),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::find_size_preset;

    fn parse(body: Value) -> GeminiResponse {
        serde_json::from_value(body).expect("valid response")
    }

    #[test]
    fn history_serializes_in_gemini_shape() {
        let history = vec![
            ChatTurn::user(vec![ChatPart::image(b"raw"), ChatPart::text("what is this?")]),
            ChatTurn::model("a bottle"),
        ];
        let value = serde_json::to_value(&history).expect("serializable");
        assert_eq!(value[0]["role"], "user");
        assert_eq!(value[0]["parts"][0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(value[0]["parts"][0]["inlineData"]["data"], "cmF3");
        assert_eq!(value[0]["parts"][1]["text"], "what is this?");
        assert_eq!(value[1], json!({ "role": "model", "parts": [{ "text": "a bottle" }] }));
    }

    #[test]
    fn raster_payload_puts_images_before_prompt_and_sets_aspect_ratio() {
        let size = find_size_preset("bottle").expect("preset");
        let payload = build_raster_payload("shampoo", &[b"a".to_vec(), b"b".to_vec()], size);
        let parts = payload["contents"][0]["parts"].as_array().expect("parts");
        assert_eq!(parts.len(), 3);
        assert!(parts[0].get("inlineData").is_some());
        assert_eq!(parts[2]["text"], "shampoo");
        assert_eq!(
            payload["generationConfig"]["imageConfig"]["aspectRatio"],
            "9:16"
        );
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
    }

    #[test]
    fn svg_instruction_carries_physical_size() {
        let size = find_size_preset("label-a6").expect("preset");
        let payload = build_svg_payload("label", &[], size, 8192);
        let instruction = payload["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .expect("instruction");
        assert!(instruction.contains("width=\"105mm\" height=\"148mm\""));
        assert!(instruction.contains("viewBox=\"0 0 105 148\""));
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn extracts_text_and_image_parts() {
        let response = parse(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here you go", "thoughtSignature": "abc" },
                    { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } },
                    { "functionCall": { "name": "noop" } }
                ]},
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(response.text().as_deref(), Some("Here you go"));
        assert_eq!(response.first_image(), Some(b"hello".to_vec()));
    }

    #[test]
    fn missing_parts_report_block_reason() {
        let response = parse(json!({ "promptFeedback": { "blockReason": "SAFETY" } }));
        assert!(response.text().is_none());
        match response.missing("image data") {
            GenerationError::MalformedResponse(detail) => {
                assert_eq!(detail, "image data (blocked: SAFETY)")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_body_prefers_api_message() {
        let (message, _) =
            summarize_error_body(r#"{"error":{"code":429,"message":"Resource has been exhausted"}}"#);
        assert_eq!(message.as_deref(), Some("Resource has been exhausted"));
        let (message, summary) = summarize_error_body("   ");
        assert!(message.is_none());
        assert_eq!(summary, "empty response body");
    }

    #[test]
    fn redacts_api_key() {
        let client = GeminiClient::new(
            "secret-key",
            "http://localhost",
            "image-model",
            1024,
            Duration::from_secs(5),
        );
        assert_eq!(client.redact("url?key=secret-key"), "url?key=[redacted]");
    }

    /// Answers one request with a canned HTTP response and hands back the raw
    /// request it received.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let read = socket.read(&mut buf).await.expect("read");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (base_url, server)
    }

    fn local_client(base_url: &str) -> GeminiClient {
        GeminiClient::new(
            "test-key",
            base_url,
            "image-model",
            1024,
            Duration::from_secs(5),
        )
        .with_http(Client::new())
    }

    fn label_a6() -> SizePreset {
        *find_size_preset("label-a6").expect("preset")
    }

    #[tokio::test]
    async fn non_success_status_becomes_http_error_with_api_message() {
        let (base_url, server) = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"code":429,"message":"Resource has been exhausted"}}"#,
        )
        .await;
        let client = local_client(&base_url);

        let err = client
            .chat("gemini-2.5-flash", &[ChatTurn::user(vec![ChatPart::text("hi")])])
            .await
            .expect_err("429 must fail");

        match err {
            GenerationError::Http { status, message } => {
                assert_eq!(status, reqwest::StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(message, "Resource has been exhausted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let request = server.await.expect("server");
        assert!(request.starts_with("POST /models/gemini-2.5-flash:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
    }

    #[tokio::test]
    async fn raster_response_without_image_is_malformed() {
        let (base_url, server) = serve_once("200 OK", r#"{"candidates":[]}"#).await;
        let client = local_client(&base_url);

        let err = client
            .generate_raster("a poster", &[], &label_a6())
            .await
            .expect_err("no image part");

        assert!(
            matches!(&err, GenerationError::MalformedResponse(detail) if detail == "image data"),
            "unexpected error: {err:?}"
        );
        let request = server.await.expect("server");
        assert!(request.contains("/models/image-model:generateContent"));
        assert!(request.contains(r#""aspectRatio":"3:4""#));
    }

    #[tokio::test]
    async fn undecodable_success_body_is_malformed() {
        let (base_url, server) = serve_once("200 OK", "<html>proxy error</html>").await;
        let client = local_client(&base_url);

        let err = client
            .generate_svg("gemini-2.5-pro", "a label", &[], &label_a6())
            .await
            .expect_err("not json");

        assert!(matches!(err, GenerationError::MalformedResponse(_)), "unexpected error: {err:?}");
        server.await.expect("server");
    }

    #[tokio::test]
    async fn svg_reply_is_extracted_from_text_parts() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"candidates":[{"content":{"parts":[{"text":"```svg\n<svg width=\"105mm\"><rect/></svg>\n```"}]}}]}"#,
        )
        .await;
        let client = local_client(&base_url);

        let document = client
            .generate_svg("gemini-2.5-pro", "a label", &[], &label_a6())
            .await
            .expect("svg document");

        assert!(document.contains(r#"<svg xmlns="http://www.w3.org/2000/svg" width="105mm"><rect/></svg>"#));
        server.await.expect("server");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        drop(listener);
        let client = local_client(&base_url);

        let err = client
            .generate_raster("a poster", &[], &label_a6())
            .await
            .expect_err("nothing listening");

        match err {
            GenerationError::Transport(detail) => assert!(!detail.contains("test-key")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
