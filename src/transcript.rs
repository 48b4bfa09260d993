//! In-memory conversation transcript.
//!
//! The transcript is append-only: messages are never removed or reordered.
//! The only in-place mutation is on a model message while its turn streams,
//! addressed by message id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Model,
}

impl Author {
    pub fn as_str(&self) -> &'static str {
        match self {
            Author::User => "user",
            Author::Model => "model",
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub author: Author,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Author::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Author::Model, text)
    }

    /// Empty model message that a streaming turn fills in
    pub fn placeholder() -> Self {
        Self::new(Author::Model, String::new())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Append a fragment to the message with `id`. Returns the updated text.
    pub fn append_text(&mut self, id: Uuid, fragment: &str) -> Option<&str> {
        let message = self.messages.iter_mut().rev().find(|m| m.id == id)?;
        message.text.push_str(fragment);
        Some(&message.text)
    }

    /// Overwrite the text of the message with `id`
    pub fn replace_text(&mut self, id: Uuid, text: &str) -> bool {
        match self.messages.iter_mut().rev().find(|m| m.id == id) {
            Some(message) => {
                message.text = text.to_string();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages eligible for analysis: everything except `in_flight` and
    /// anything still empty.
    pub fn completed(&self, in_flight: Option<Uuid>) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| Some(m.id) != in_flight && !m.text.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// Render messages as `AUTHOR: text` lines, in order.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.author.as_str().to_uppercase(), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}
