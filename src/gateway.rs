//! Model gateway: stateful persona dialogue and one-shot transcript analysis.
//!
//! The gateway owns translation between session data and model requests. It
//! never touches session storage; streamed fragments leave through the
//! caller's callback only.

use crate::config::GatewayConfig;
use crate::feedback::{self, FeedbackReport};
use crate::gemini_api::GeminiClient;
use crate::llm::{GenerateRequest, LlmClient, LlmError, Turn};
use crate::transcript::{render_transcript, Message};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// A dialogue could not be established
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayInitError {
    #[error("no API key configured; set {env_var} or api_key in the config file")]
    MissingCredentials { env_var: String },
    #[error("failed to build model client: {0}")]
    Client(String),
}

/// A turn failed after it was initiated.
/// `partial` holds the text of every fragment delivered before the failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("dialogue turn failed after {delivered} fragment(s): {source}")]
pub struct StreamError {
    pub partial: String,
    pub delivered: usize,
    #[source]
    pub source: LlmError,
}

/// Owned handle to one stateful dialogue.
///
/// Holds the bound system instruction and the committed history. Not
/// `Clone`: a handle belongs to exactly one session epoch.
#[derive(Debug)]
pub struct DialogueHandle {
    id: Uuid,
    system_instruction: String,
    temperature: f32,
    history: Vec<Turn>,
}

impl DialogueHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Committed turns (user and model), oldest first
    pub fn history(&self) -> &[Turn] {
        &self.history
    }
}

/// Model names the gateway addresses
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub chat_model: String,
    pub feedback_model: String,
}

impl From<&GatewayConfig> for ModelSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            chat_model: config.chat_model.clone(),
            feedback_model: config.feedback_model.clone(),
        }
    }
}

pub struct ModelGateway {
    client: Result<Arc<dyn LlmClient>, GatewayInitError>,
    models: ModelSettings,
}

impl ModelGateway {
    /// Build a gateway from configuration.
    ///
    /// Never fails: a missing credential or an unbuildable client is kept
    /// and reported as `GatewayInitError` on first use.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let client = match config.resolve_api_key() {
            Ok(api_key) => GeminiClient::new(
                &config.base_url,
                api_key,
                Duration::from_secs(config.connect_timeout_secs),
            )
            .map(|c| Arc::new(c) as Arc<dyn LlmClient>)
            .map_err(|e| GatewayInitError::Client(e.to_string())),
            Err(e) => Err(e),
        };

        Self {
            client,
            models: ModelSettings::from(config),
        }
    }

    /// Build a gateway around an existing client
    pub fn with_client(client: Arc<dyn LlmClient>, models: ModelSettings) -> Self {
        Self {
            client: Ok(client),
            models,
        }
    }

    fn client(&self) -> Result<&Arc<dyn LlmClient>, GatewayInitError> {
        self.client.as_ref().map_err(Clone::clone)
    }

    /// Open a dialogue bound to `preamble` as its system instruction
    pub fn create_dialogue_session(
        &self,
        preamble: &str,
        temperature: f32,
    ) -> Result<DialogueHandle, GatewayInitError> {
        self.client()?;
        let handle = DialogueHandle {
            id: Uuid::new_v4(),
            system_instruction: preamble.to_string(),
            temperature,
            history: Vec::new(),
        };
        tracing::debug!(handle = %handle.id, temperature, "dialogue session created");
        Ok(handle)
    }

    /// Send `user_text` as the next turn on `handle`.
    ///
    /// `on_fragment` runs once per non-empty fragment, in arrival order,
    /// before the next fragment is awaited. The handle's history is only
    /// extended when the whole reply arrived.
    pub async fn send_turn<F>(
        &self,
        handle: &mut DialogueHandle,
        user_text: &str,
        mut on_fragment: F,
    ) -> Result<String, StreamError>
    where
        F: FnMut(&str) + Send,
    {
        let handle_id = handle.id;
        let mut full_text = String::new();
        let mut delivered = 0usize;

        let fail = |partial: String, delivered: usize, source: LlmError| {
            tracing::warn!(handle = %handle_id, delivered, error = %source, "dialogue turn failed");
            StreamError {
                partial,
                delivered,
                source,
            }
        };

        let client = match self.client() {
            Ok(client) => client,
            Err(e) => return Err(fail(full_text, 0, LlmError::Unavailable(e.to_string()))),
        };

        let mut contents = handle.history.clone();
        contents.push(Turn::user(user_text));
        let request = GenerateRequest::new(self.models.chat_model.clone(), contents)
            .with_system_instruction(handle.system_instruction.clone())
            .with_temperature(handle.temperature);

        tracing::info!(handle = %handle_id, turn = handle.history.len() / 2 + 1, "sending turn");

        let mut stream = match client.stream_generate(&request).await {
            Ok(stream) => stream,
            Err(e) => return Err(fail(full_text, 0, e)),
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) if fragment.is_empty() => {}
                Ok(fragment) => {
                    on_fragment(&fragment);
                    full_text.push_str(&fragment);
                    delivered += 1;
                }
                Err(e) => return Err(fail(full_text, delivered, e)),
            }
        }

        tracing::info!(
            handle = %handle_id,
            fragments = delivered,
            bytes = full_text.len(),
            "turn complete"
        );

        handle.history.push(Turn::user(user_text));
        handle.history.push(Turn::model(full_text.clone()));
        Ok(full_text)
    }

    /// Produce a feedback report for `transcript`.
    ///
    /// Never fails: any error yields `FeedbackReport::fallback()`.
    pub async fn analyze_transcript(&self, transcript: &[Message]) -> FeedbackReport {
        match self.try_analyze(transcript).await {
            Ok(report) => {
                tracing::info!(
                    clarity = report.clarity.score,
                    confidence = report.confidence.score,
                    suggestions = report.suggestions.len(),
                    "analysis complete"
                );
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "analysis failed, using fallback report");
                FeedbackReport::fallback()
            }
        }
    }

    async fn try_analyze(&self, transcript: &[Message]) -> anyhow::Result<FeedbackReport> {
        let client = self.client()?;
        let prompt = feedback::build_analysis_prompt(&render_transcript(transcript));
        let request = GenerateRequest::new(self.models.feedback_model.clone(), vec![Turn::user(prompt)])
            .with_response_schema(feedback::response_schema());

        tracing::info!(messages = transcript.len(), "analyzing transcript");
        let raw = client.generate(&request).await?;
        Ok(feedback::parse_report(&raw)?)
    }
}
