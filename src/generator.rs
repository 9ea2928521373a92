// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The external generator contract (§6): the engine's only collaborator
//! besides the cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a generator call did not return usable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model completed its response normally.
    Stop,
    /// The model hit its output-token budget; treated as a truncation
    /// error and surfaced as a missing artifact.
    Length,
    /// Some other provider-specific stop condition.
    Other(String),
}

/// Usage accounting reported by the generator call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GeneratorUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: Option<u64>,
    pub cache_write_tokens: Option<u64>,
}

/// A structured-schema request used for judging: the generator is asked
/// to return a winner token plus free-text reasoning.
#[derive(Debug, Clone)]
pub struct JudgmentSchema;

/// Parameters for a single `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// Present only for judgment calls (structured-schema mode).
    pub structured_schema: Option<JudgmentSchema>,
}

/// The generator's response.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: GeneratorUsage,
}

/// Errors a generator call can raise. Retryable transience (rate-limit,
/// 5xx, empty output) is the generator's own concern (§7) — by the time
/// it reaches the engine, it is a terminal failure for this attempt.
#[derive(Error, Debug, Clone)]
pub enum GeneratorError {
    #[error("generator call failed: {0}")]
    CallFailed(String),
}

/// The external write/critique/judge collaborator. Implementations wrap
/// a concrete provider; the engine only ever calls through this trait,
/// always via the ensure-cascade.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, GeneratorError>;
}

/// Parsed result of a judging call: a winner token plus the judge's
/// rationale. Accepts either a strict structured response or a tolerant
/// JSON-object extraction fallback; both reject responses lacking a
/// valid winner token (§9).
#[derive(Debug, Clone, Deserialize)]
struct StructuredJudgment {
    winner: String,
    #[serde(default)]
    reasoning: String,
}

/// Parse a judge's raw response text into `(winner, reasoning)`. Tries
/// strict JSON first; on failure, extracts the first `{...}` span and
/// retries (mirrors the reference stack's `extract_json` fallback).
pub fn parse_judgment(raw_text: &str) -> Option<(crate::model::Winner, String)> {
    if let Some(parsed) = try_parse_structured(raw_text) {
        return Some(parsed);
    }
    let extracted = extract_json_object(raw_text)?;
    try_parse_structured(&extracted)
}

fn try_parse_structured(text: &str) -> Option<(crate::model::Winner, String)> {
    let parsed: StructuredJudgment = serde_json::from_str(text).ok()?;
    let winner = parse_winner_token(&parsed.winner)?;
    Some((winner, parsed.reasoning))
}

fn parse_winner_token(token: &str) -> Option<crate::model::Winner> {
    match token.trim().to_ascii_lowercase().as_str() {
        "a" => Some(crate::model::Winner::A),
        "b" => Some(crate::model::Winner::B),
        "tie" => Some(crate::model::Winner::Tie),
        _ => None,
    }
}

/// Find the first `{` and the last `}` in `text` and return the span
/// between them, inclusive. Tolerates a judge wrapping its JSON in
/// prose.
fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(text[start..=end].to_string())
}
