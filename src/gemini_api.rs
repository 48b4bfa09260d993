//! Translation layer between internal request types and the Gemini REST API,
//! plus the HTTP client that speaks it.
//!
//! All translation happens at the HTTP boundary; `GenerateRequest` and the
//! fragment stream stay provider-neutral.

use crate::llm::{FragmentStream, GenerateRequest, LlmClient, LlmError, Role};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ============ Request Translation ============

/// `{base}/models/{model}:generateContent`
pub fn generate_url(base_url: &str, model: &str) -> String {
    format!(
        "{}/models/{}:generateContent",
        base_url.trim_end_matches('/'),
        model
    )
}

/// `{base}/models/{model}:streamGenerateContent?alt=sse`
pub fn stream_url(base_url: &str, model: &str) -> String {
    format!(
        "{}/models/{}:streamGenerateContent?alt=sse",
        base_url.trim_end_matches('/'),
        model
    )
}

/// Gemini headers as (name, value) pairs. The key goes in a header rather
/// than the query string so it never shows up in logged URLs.
pub fn build_headers(api_key: &str) -> Vec<(&'static str, String)> {
    vec![
        ("x-goog-api-key", api_key.to_string()),
        ("Content-Type", "application/json".to_string()),
    ]
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

/// Translate a GenerateRequest into a Gemini request body.
pub fn translate_request(request: &GenerateRequest) -> Value {
    let contents: Vec<Value> = request
        .contents
        .iter()
        .map(|turn| {
            json!({
                "role": wire_role(turn.role),
                "parts": [{ "text": turn.text }],
            })
        })
        .collect();

    let mut body = json!({ "contents": contents });

    if let Some(instruction) = &request.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(schema) = &request.response_schema {
        generation_config.insert("responseMimeType".to_string(), json!("application/json"));
        generation_config.insert("responseSchema".to_string(), schema.clone());
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }

    body
}

// ============ Response Translation ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    /// Present when the server reports an error inside a stream event
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
pub struct PartResponse {
    #[serde(default)]
    pub text: Option<String>,
    /// Thought summaries are not part of the reply
    #[serde(default)]
    pub thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ErrorBody {
    fn describe(&self, fallback: &str) -> String {
        let message = self.message.clone().unwrap_or_else(|| fallback.to_string());
        match &self.status {
            Some(status) if !status.is_empty() => format!("{}: {}", status, message),
            _ => message,
        }
    }
}

/// Concatenate the reply text of the first candidate.
/// Returns None when the response carries no reply text.
pub fn extract_text(response: &GeminiResponse) -> Option<String> {
    let content = response.candidates.first()?.content.as_ref()?;
    let text: String = content
        .parts
        .iter()
        .filter(|part| !part.thought)
        .filter_map(|part| part.text.as_deref())
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Check a parsed response for in-band errors or a blocked prompt
fn check_response(response: &GeminiResponse) -> Result<(), LlmError> {
    if let Some(error) = &response.error {
        return Err(LlmError::Api {
            status: error.code.unwrap_or(0),
            message: error.describe("stream error"),
        });
    }
    if response.candidates.is_empty() {
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(LlmError::Blocked(reason.to_string()));
        }
    }
    Ok(())
}

/// Map a non-success HTTP response to an LlmError.
pub fn map_http_error(status: StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| wrapper.error.describe(body))
        .unwrap_or_else(|_| body.to_string());
    LlmError::Api {
        status: status.as_u16(),
        message,
    }
}

// ============ Streaming Translation ============

/// Decode one SSE `data:` payload into a reply fragment.
/// Ok(None) means the event carried no text (keepalive, finish marker).
pub fn decode_stream_event(data: &str) -> Result<Option<String>, LlmError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let response: GeminiResponse =
        serde_json::from_str(data).map_err(|e| LlmError::Decode(e.to_string()))?;
    check_response(&response)?;
    Ok(extract_text(&response))
}

// ============ Client ============

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, LlmError> {
        let mut builder = self.http.post(url);
        for (name, value) in build_headers(self.api_key.expose_secret()) {
            builder = builder.header(name, value);
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(map_http_error(status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn stream_generate(&self, request: &GenerateRequest) -> Result<FragmentStream, LlmError> {
        let url = stream_url(&self.base_url, &request.model);
        tracing::debug!(model = %request.model, turns = request.contents.len(), "starting stream");

        let response = self.post(&url, &translate_request(request)).await?;

        let fragments = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => decode_stream_event(&event.data).transpose(),
                    Err(e) => Some(Err(LlmError::Transport(e.to_string()))),
                }
            });

        Ok(Box::pin(fragments))
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let url = generate_url(&self.base_url, &request.model);
        tracing::debug!(model = %request.model, "generating");

        let response = self.post(&url, &translate_request(request)).await?;
        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        check_response(&parsed)?;
        extract_text(&parsed).ok_or(LlmError::Empty)
    }
}
