// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core data model: models, prompts, samples, feedback, and judgments (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A writer or judge identity. The label is free-form (e.g.
/// `"anthropic:claude-3-opus"`); it is the unit everything in the engine is
/// keyed and rated by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelId(pub String);

impl ModelId {
    /// Build a `ModelId` from anything string-like.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The virtual writer used as the feedback dimension's baseline: a
    /// revision's original side, with no feedback applied, is framed as a
    /// game against this sentinel rather than against any real model.
    pub fn self_baseline() -> Self {
        Self("self".to_string())
    }

    /// Sanitized path component: `:`, `/`, `\` become `_`.
    pub fn as_path_key(&self) -> String {
        self.0.replace([':', '/', '\\'], "_")
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stable, opaque identifier assigned once at artifact creation and
/// propagated into downstream artifacts' provenance fields. Doubles as the
/// artifact's cache-ID once persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    /// Mint a fresh, random artifact id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable task description with a stable id and judging criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// The file's basename (without extension), per §6.
    pub id: String,
    /// Content-addressed task text; the cache key for writes.
    pub content: String,
    /// Free-form categorization tags.
    pub tags: Vec<String>,
    /// Criteria judges are asked to weigh.
    pub judging_criteria: Vec<String>,
    /// Optional prompt shown to the feedback-giving model.
    pub feedback_prompt: Option<String>,
    /// Optional prompt shown to the revising model.
    pub revision_prompt: Option<String>,
    /// Optional word budget enforced upstream (generator concern).
    pub max_words: Option<u32>,
}

/// Token/cost accounting attached to every generated artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens consumed by the generator call.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
    /// Tokens served from the provider's own cache, if reported.
    pub cache_read_tokens: u64,
    /// Tokens written to the provider's own cache, if reported.
    pub cache_write_tokens: u64,
    /// Estimated dollar cost of the call.
    pub cost: f64,
}

/// Which stage of the write pipeline a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStage {
    /// A first-draft response to the prompt.
    Initial,
    /// A response revised in light of feedback.
    Revised,
}

/// Provenance of a revised sample: which draft it revises and which
/// feedback (from which model) it incorporates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionOrigin {
    /// The initial sample being revised.
    pub origin_sample_id: ArtifactId,
    /// The feedback artifact incorporated into the revision.
    pub feedback_id: ArtifactId,
    /// The model that produced that feedback.
    pub feedback_model: ModelId,
}

/// A writing artifact: an initial draft or a feedback-informed revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Cache-ID / artifact id, assigned once.
    pub id: ArtifactId,
    /// The writer that produced this text.
    pub model: ModelId,
    /// The prompt this sample answers.
    pub prompt_id: String,
    /// Index among this (model, prompt) pair's outputs, starting at 0.
    pub output_index: u32,
    /// The generated text itself.
    pub text: String,
    /// Initial draft or revision.
    pub stage: WriteStage,
    /// Set only when `stage == Revised`.
    pub origin: Option<RevisionOrigin>,
    /// Usage/cost metadata for the generator call that produced this.
    pub usage: Usage,
    /// When this was created.
    pub created_at: DateTime<Utc>,
}

impl Sample {
    /// A fresh initial sample.
    pub fn new_initial(
        model: ModelId,
        prompt_id: impl Into<String>,
        output_index: u32,
        text: impl Into<String>,
        usage: Usage,
    ) -> Self {
        Self {
            id: ArtifactId::new(),
            model,
            prompt_id: prompt_id.into(),
            output_index,
            text: text.into(),
            stage: WriteStage::Initial,
            origin: None,
            usage,
            created_at: Utc::now(),
        }
    }

    /// A fresh revision, inheriting the originating sample's identity.
    #[allow(clippy::too_many_arguments)]
    pub fn new_revision(
        model: ModelId,
        prompt_id: impl Into<String>,
        output_index: u32,
        text: impl Into<String>,
        origin: RevisionOrigin,
        usage: Usage,
    ) -> Self {
        Self {
            id: ArtifactId::new(),
            model,
            prompt_id: prompt_id.into(),
            output_index,
            text: text.into(),
            stage: WriteStage::Revised,
            origin: Some(origin),
            usage,
            created_at: Utc::now(),
        }
    }
}

/// Critique of a target sample, produced by a (usually different) model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Cache-ID / artifact id.
    pub id: ArtifactId,
    /// The model that wrote the critique.
    pub source_model: ModelId,
    /// The initial sample being critiqued.
    pub target_sample_id: ArtifactId,
    /// The critique text.
    pub text: String,
    /// Usage/cost metadata.
    pub usage: Usage,
    /// When this was created.
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    /// Build a fresh feedback artifact.
    pub fn new(
        source_model: ModelId,
        target_sample_id: ArtifactId,
        text: impl Into<String>,
        usage: Usage,
    ) -> Self {
        Self {
            id: ArtifactId::new(),
            source_model,
            target_sample_id,
            text: text.into(),
            usage,
            created_at: Utc::now(),
        }
    }
}

/// Who a pairwise comparison favored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// Side A won.
    A,
    /// Side B won.
    B,
    /// Neither side won.
    Tie,
}

impl Winner {
    /// The winner as seen from the opposite (A, B) ordering.
    pub fn flipped(self) -> Self {
        match self {
            Winner::A => Winner::B,
            Winner::B => Winner::A,
            Winner::Tie => Winner::Tie,
        }
    }

    /// Win share in `[0, 1]` attributed to side A: 1.0, 0.0, or 0.5.
    pub fn share_a(self) -> f64 {
        match self {
            Winner::A => 1.0,
            Winner::B => 0.0,
            Winner::Tie => 0.5,
        }
    }
}

/// Which comparison a judgment makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentStage {
    /// Two initial samples for the same prompt, different writers.
    Initial,
    /// Two revised samples sharing a single feedback-provider.
    Revised,
    /// A writer's initial sample vs its own revision.
    Improvement,
}

/// A single pairwise verdict from a judge model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    /// Cache-ID / artifact id.
    pub id: ArtifactId,
    /// The model acting as judge.
    pub judge_model: ModelId,
    /// The prompt both samples answer.
    pub prompt_id: String,
    /// The first sample, in canonical (caller) order.
    pub sample_a: ArtifactId,
    /// The second sample, in canonical (caller) order.
    pub sample_b: ArtifactId,
    /// Which side won, relative to `sample_a`/`sample_b` as stored.
    pub winner: Winner,
    /// What kind of comparison this is.
    pub stage: JudgmentStage,
    /// Usage/cost metadata for the judging call.
    pub usage: Usage,
    /// The judge's free-text rationale.
    pub reasoning: String,
    /// Whether the generator was shown samples in (B, A) order.
    pub position_swapped: bool,
    /// When this was created.
    pub created_at: DateTime<Utc>,
}

impl Judgment {
    /// Re-orient this judgment as if it had been queried with `(a, b)`
    /// swapped relative to how it is stored: flips `winner` and
    /// `position_swapped`, and swaps `sample_a`/`sample_b`.
    pub fn reoriented_for(&self, wanted_a: ArtifactId) -> Judgment {
        if self.sample_a == wanted_a {
            self.clone()
        } else {
            Judgment {
                sample_a: self.sample_b,
                sample_b: self.sample_a,
                winner: self.winner.flipped(),
                position_swapped: !self.position_swapped,
                ..self.clone()
            }
        }
    }
}
