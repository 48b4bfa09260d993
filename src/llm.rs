//! Provider-neutral model client interface.
//!
//! Request types here are what the gateway builds; provider modules
//! (currently `gemini_api`) translate them at the HTTP boundary.

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One entry of a dialogue history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub contents: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// When set, the model must answer with JSON conforming to this schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, contents: Vec<Turn>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            contents,
            temperature: None,
            response_schema: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("model returned no text")]
    Empty,
    #[error("prompt blocked: {0}")]
    Blocked(String),
    #[error("model client unavailable: {0}")]
    Unavailable(String),
}

/// Ordered text fragments of one model reply
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Trait for model clients to allow mocking and abstraction
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a generation and return its fragments as they arrive
    async fn stream_generate(&self, request: &GenerateRequest) -> Result<FragmentStream, LlmError>;

    /// Run a generation to completion and return the full text
    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError>;
}
