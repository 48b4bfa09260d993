//! Roleplay persona catalog.
//!
//! Personas are static: the catalog is built once on first access and never
//! mutated afterwards. Each persona carries the behavioral preamble that is
//! bound as the system instruction of its dialogue.

mod catalog;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Opening line shown to the user before the kickoff turn arrives.
/// It is a UX hint only and is never sent to the model.
pub const INITIAL_GREETING: &str = "Hello! I'm ready to practice. Please start the conversation.";

/// Stable persona identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaId {
    Interviewer,
    Ielts,
    SalesCustomer,
    AngryClient,
    Casual,
}

impl PersonaId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaId::Interviewer => "interviewer",
            PersonaId::Ielts => "ielts",
            PersonaId::SalesCustomer => "sales_customer",
            PersonaId::AngryClient => "angry_client",
            PersonaId::Casual => "casual",
        }
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaId {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "interviewer" => Ok(PersonaId::Interviewer),
            "ielts" => Ok(PersonaId::Ielts),
            "sales_customer" => Ok(PersonaId::SalesCustomer),
            "angry_client" => Ok(PersonaId::AngryClient),
            "casual" => Ok(PersonaId::Casual),
            _ => Err(UnknownPersona(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown persona: {0}")]
pub struct UnknownPersona(pub String);

/// A roleplay persona. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persona {
    pub id: PersonaId,
    pub title: &'static str,
    pub description: &'static str,
    pub emoji: &'static str,
    /// Display accent, as a CSS-style color token
    pub color: &'static str,
    /// System instruction defining the persona and its conversational strategy
    pub preamble: &'static str,
}

/// All personas in display order
pub fn catalog() -> &'static [Persona] {
    static CATALOG: OnceLock<Vec<Persona>> = OnceLock::new();
    CATALOG.get_or_init(catalog::builtin)
}

/// Get persona by id
pub fn get_persona(id: PersonaId) -> &'static Persona {
    // builtin() covers every PersonaId variant
    catalog()
        .iter()
        .find(|p| p.id == id)
        .unwrap_or(&catalog()[0])
}

/// Resolve a persona from user input: an id ("angry_client") or a
/// 1-based position in the catalog ("4").
pub fn find_persona(selector: &str) -> Result<&'static Persona, UnknownPersona> {
    let selector = selector.trim();
    if let Ok(index) = selector.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| catalog().get(i))
            .ok_or_else(|| UnknownPersona(selector.to_string()));
    }
    selector.parse::<PersonaId>().map(get_persona)
}
