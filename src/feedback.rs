//! Structured feedback report: types, response schema, and parsing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const FALLBACK_REASONING: &str = "Could not generate analysis.";
pub const FALLBACK_SUMMARY: &str =
    "An error occurred while analyzing the conversation. Please try again.";

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// 0 to 100
    pub score: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub original: String,
    pub improved: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    pub clarity: Metric,
    pub confidence: Metric,
    pub filler_words: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    pub overall_summary: String,
}

impl FeedbackReport {
    /// Canonical report returned whenever analysis cannot be produced
    pub fn fallback() -> Self {
        Self {
            clarity: Metric {
                score: 0.0,
                reasoning: FALLBACK_REASONING.to_string(),
            },
            confidence: Metric {
                score: 0.0,
                reasoning: FALLBACK_REASONING.to_string(),
            },
            filler_words: Vec::new(),
            suggestions: Vec::new(),
            overall_summary: FALLBACK_SUMMARY.to_string(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == Self::fallback()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("model returned an empty report")]
    Empty,
    #[error("report is not valid JSON for the schema: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} score is not a finite number")]
    NonFiniteScore { field: &'static str },
}

fn metric_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "score": { "type": "NUMBER", "description": "Score out of 100" },
            "reasoning": { "type": "STRING", "description": "Why this score was given" }
        },
        "required": ["score", "reasoning"]
    })
}

/// Response schema for structured generation, in Gemini's OpenAPI subset
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "clarity": metric_schema(),
            "confidence": metric_schema(),
            "fillerWords": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "List of filler words used (e.g., um, ah, like)"
            },
            "suggestions": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "original": { "type": "STRING", "description": "Original quote from user" },
                        "improved": { "type": "STRING", "description": "A better way to say it" },
                        "explanation": { "type": "STRING", "description": "Why the improvement is better" }
                    },
                    "required": ["original", "improved", "explanation"]
                }
            },
            "overallSummary": {
                "type": "STRING",
                "description": "A brief encouraging summary of performance"
            }
        },
        "required": ["clarity", "confidence", "fillerWords", "suggestions", "overallSummary"]
    })
}

/// Analysis prompt wrapping a rendered transcript
pub fn build_analysis_prompt(transcript_text: &str) -> String {
    format!(
        "Analyze the following conversation transcript between a user and an AI role-player.\n\
         Provide constructive feedback to the USER based on their performance.\n\
         \n\
         Transcript:\n\
         {}\n\
         \n\
         Return the response in strictly valid JSON format matching this schema.",
        transcript_text
    )
}

/// Strip a surrounding Markdown code fence (```json ... ```) if present
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

fn normalize_score(metric: &mut Metric, field: &'static str) -> Result<(), ReportError> {
    if !metric.score.is_finite() {
        return Err(ReportError::NonFiniteScore { field });
    }
    let clamped = metric.score.clamp(MIN_SCORE, MAX_SCORE);
    if clamped != metric.score {
        tracing::warn!(field, score = metric.score, "score out of range, clamping");
        metric.score = clamped;
    }
    Ok(())
}

/// Trim, drop blanks, and de-duplicate case-insensitively keeping first order
fn normalize_filler_words(words: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    words
        .into_iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty() && seen.insert(w.to_lowercase()))
        .collect()
}

/// Parse and normalize a model-produced report
pub fn parse_report(raw: &str) -> Result<FeedbackReport, ReportError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(ReportError::Empty);
    }

    let mut report: FeedbackReport = serde_json::from_str(body)?;
    normalize_score(&mut report.clarity, "clarity")?;
    normalize_score(&mut report.confidence, "confidence")?;
    report.filler_words = normalize_filler_words(report.filler_words);
    Ok(report)
}
