// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Run configuration (§10 "Configuration"): constructed programmatically
//! by the embedding caller. The TOML/CLI layer that populates one of
//! these from disk is out of scope (§1) but `RunConfig` still derives
//! `Serialize`/`Deserialize` so a caller may load it from its own files.

use crate::model::{ModelId, Prompt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Positive bound on outputs-per-model, or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputBudget {
    Fixed(u32),
    Unbounded,
}

impl OutputBudget {
    /// The effective cap for a given round, growing by one past the
    /// current max while still respecting a fixed budget (§4.5).
    pub fn effective(self, current_max_output_count: u32) -> u32 {
        match self {
            OutputBudget::Fixed(n) => n.min(current_max_output_count + 1),
            OutputBudget::Unbounded => current_max_output_count + 1,
        }
    }
}

/// All parameters the adaptive loop needs to run a benchmark (§6
/// "CLI-facing contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Writer models under evaluation.
    pub models: Vec<ModelId>,
    /// Judge models. Defaults to `models` when empty.
    pub judges: Vec<ModelId>,
    /// Prompts to evaluate against.
    pub prompts: Vec<Prompt>,
    /// Per-model, per-prompt output budget.
    pub outputs_per_model: OutputBudget,
    /// CI threshold (Elo scale) below which a model is globally precise.
    pub ci_threshold: f64,
    /// Minimum games per model for convergence.
    pub min_pairs_per_model: u32,
    /// Needs fulfilled per adaptive-loop round.
    pub batch_size: usize,
    /// Upper bound on adaptive-loop rounds, to guard against a
    /// pathological non-converging configuration.
    pub max_rounds: u32,
    /// Root directory of the on-disk cache tree.
    pub cache_root: PathBuf,
    /// Skip the cache entirely; every artifact is regenerated.
    pub no_cache: bool,
    /// Bound on concurrent in-flight generator calls within a batch
    /// (§4.5), enforced by a semaphore around the ensure-cascade.
    pub max_concurrent_generator_calls: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            judges: Vec::new(),
            prompts: Vec::new(),
            outputs_per_model: OutputBudget::Fixed(1),
            ci_threshold: 30.0,
            min_pairs_per_model: 5,
            batch_size: 20,
            max_rounds: 200,
            cache_root: PathBuf::from(".writing-bench-cache"),
            no_cache: false,
            max_concurrent_generator_calls: 8,
        }
    }
}

impl RunConfig {
    pub fn with_models(mut self, models: Vec<ModelId>) -> Self {
        self.models = models;
        self
    }

    pub fn with_judges(mut self, judges: Vec<ModelId>) -> Self {
        self.judges = judges;
        self
    }

    pub fn with_prompts(mut self, prompts: Vec<Prompt>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_outputs_per_model(mut self, budget: OutputBudget) -> Self {
        self.outputs_per_model = budget;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_max_concurrent_generator_calls(mut self, max: usize) -> Self {
        self.max_concurrent_generator_calls = max;
        self
    }

    /// Judges to actually use: `judges` if non-empty, else `models`.
    pub fn effective_judges(&self) -> &[ModelId] {
        if self.judges.is_empty() {
            &self.models
        } else {
            &self.judges
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_models_when_judges_unset() {
        let cfg = RunConfig::default().with_models(vec![ModelId::new("a"), ModelId::new("b")]);
        assert_eq!(cfg.effective_judges(), cfg.models.as_slice());
    }

    #[test]
    fn explicit_judges_override_models() {
        let cfg = RunConfig::default()
            .with_models(vec![ModelId::new("a")])
            .with_judges(vec![ModelId::new("j")]);
        assert_eq!(cfg.effective_judges(), &[ModelId::new("j")]);
    }

    #[test]
    fn fixed_output_budget_caps_growth() {
        let budget = OutputBudget::Fixed(2);
        assert_eq!(budget.effective(0), 1);
        assert_eq!(budget.effective(1), 2);
        assert_eq!(budget.effective(5), 2);
    }

    #[test]
    fn unbounded_output_budget_grows_by_one_each_round() {
        let budget = OutputBudget::Unbounded;
        assert_eq!(budget.effective(0), 1);
        assert_eq!(budget.effective(4), 5);
    }
}
