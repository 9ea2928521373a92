// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Need Identifier (§4.3): turns the current WHR fits into a prioritized
//! batch of candidate judgments that maximize expected information gain.

use crate::error::NeedError;
use crate::model::{JudgmentStage, ModelId};
use crate::whr::WhrFit;
use std::collections::{HashMap, HashSet};

/// Which rating dimension a Need contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Writing,
    Revised,
    Feedback,
}

impl Dimension {
    /// Cascade-cost-proportional weighting (§4.3).
    pub fn weight(self) -> f64 {
        match self {
            Dimension::Writing => 1.0,
            Dimension::Revised => 0.4,
            Dimension::Feedback => 0.25,
        }
    }
}

/// A candidate judgment to run, tagged by dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Need {
    InitialJudgment {
        model_a: ModelId,
        model_b: ModelId,
        out_idx_a: u32,
        out_idx_b: u32,
        prompt: String,
        judge: ModelId,
    },
    ImprovementJudgment {
        writer: ModelId,
        fb_model: ModelId,
        out_idx: u32,
        prompt: String,
        judge: ModelId,
    },
    RevisedJudgment {
        model_a: ModelId,
        model_b: ModelId,
        out_idx_a: u32,
        out_idx_b: u32,
        fb_model: ModelId,
        prompt: String,
        judge: ModelId,
    },
}

impl Need {
    /// The dimension this Need feeds into.
    pub fn dimension(&self) -> Dimension {
        match self {
            Need::InitialJudgment { .. } => Dimension::Writing,
            Need::RevisedJudgment { .. } => Dimension::Revised,
            Need::ImprovementJudgment { .. } => Dimension::Feedback,
        }
    }

    /// The judgment-stage this Need will, once fulfilled, produce.
    pub fn stage(&self) -> JudgmentStage {
        match self {
            Need::InitialJudgment { .. } => JudgmentStage::Initial,
            Need::RevisedJudgment { .. } => JudgmentStage::Revised,
            Need::ImprovementJudgment { .. } => JudgmentStage::Improvement,
        }
    }

    /// `(dimension, model-pair, prompt)` grouping key for diversification
    /// (§4.3: candidates are grouped by dimension as well as pair/prompt,
    /// so e.g. revised-stage candidates on a pair diversify independently
    /// from initial-judgment candidates on the same pair).
    fn pair_prompt_key(&self) -> (Dimension, String, String, String) {
        let (lo, hi, prompt) = match self {
            Need::InitialJudgment { model_a, model_b, prompt, .. } => {
                sorted_pair_prompt(model_a, model_b, prompt)
            }
            Need::RevisedJudgment { model_a, model_b, prompt, .. } => {
                sorted_pair_prompt(model_a, model_b, prompt)
            }
            Need::ImprovementJudgment { writer, fb_model, prompt, .. } => {
                sorted_pair_prompt(writer, fb_model, prompt)
            }
        };
        (self.dimension(), lo, hi, prompt)
    }

    /// The completed-work key identifying this Need's eventual judgment.
    fn judgment_key(&self) -> CompletedKey {
        match self {
            Need::InitialJudgment { model_a, model_b, out_idx_a, out_idx_b, prompt, judge } => {
                let (lo, hi) = sorted2(model_a.clone(), model_b.clone());
                let (ilo, ihi) = sorted_idx(*out_idx_a, *out_idx_b);
                CompletedKey {
                    stage: JudgmentStage::Initial,
                    models: (lo, hi),
                    fb_context: String::new(),
                    prompt: prompt.clone(),
                    judge: judge.clone(),
                    out_idxs: (ilo, ihi),
                }
            }
            Need::RevisedJudgment { model_a, model_b, out_idx_a, out_idx_b, fb_model, prompt, judge } => {
                let (lo, hi) = sorted2(model_a.clone(), model_b.clone());
                let (ilo, ihi) = sorted_idx(*out_idx_a, *out_idx_b);
                CompletedKey {
                    stage: JudgmentStage::Revised,
                    models: (lo, hi),
                    fb_context: fb_model.0.clone(),
                    prompt: prompt.clone(),
                    judge: judge.clone(),
                    out_idxs: (ilo, ihi),
                }
            }
            Need::ImprovementJudgment { writer, fb_model, out_idx, prompt, judge } => {
                let (lo, hi) = sorted2(writer.clone(), fb_model.clone());
                CompletedKey {
                    stage: JudgmentStage::Improvement,
                    models: (lo, hi),
                    fb_context: String::new(),
                    prompt: prompt.clone(),
                    judge: judge.clone(),
                    out_idxs: (*out_idx, *out_idx),
                }
            }
        }
    }

    fn judge(&self) -> &ModelId {
        match self {
            Need::InitialJudgment { judge, .. }
            | Need::RevisedJudgment { judge, .. }
            | Need::ImprovementJudgment { judge, .. } => judge,
        }
    }

    fn depth(&self) -> u32 {
        match self {
            Need::InitialJudgment { out_idx_a, out_idx_b, .. }
            | Need::RevisedJudgment { out_idx_a, out_idx_b, .. } => (*out_idx_a).max(*out_idx_b),
            Need::ImprovementJudgment { out_idx, .. } => *out_idx,
        }
    }

    fn models(&self) -> (ModelId, ModelId) {
        match self {
            Need::InitialJudgment { model_a, model_b, .. }
            | Need::RevisedJudgment { model_a, model_b, .. } => (model_a.clone(), model_b.clone()),
            Need::ImprovementJudgment { fb_model, .. } => (ModelId::self_baseline(), fb_model.clone()),
        }
    }
}

fn sorted2(a: ModelId, b: ModelId) -> (ModelId, ModelId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn sorted_idx(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn sorted_pair_prompt(a: &ModelId, b: &ModelId, prompt: &str) -> (String, String, String) {
    let (lo, hi) = if a <= b {
        (a.0.clone(), b.0.clone())
    } else {
        (b.0.clone(), a.0.clone())
    };
    (lo, hi, prompt.to_string())
}

/// Identifies a completed judgment, for filtering already-done Needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompletedKey {
    pub stage: JudgmentStage,
    pub models: (ModelId, ModelId),
    /// Feedback-provider context for revised-stage keys; empty otherwise.
    pub fb_context: String,
    pub prompt: String,
    pub judge: ModelId,
    pub out_idxs: (u32, u32),
}

/// Tracks what has already landed or is known-unreachable, so candidates
/// referencing it are filtered before scoring.
#[derive(Debug, Clone, Default)]
pub struct CompletedWork {
    pub judgments: HashSet<CompletedKey>,
    pub missing_samples: HashSet<(ModelId, String, u32)>,
    pub missing_feedback: HashSet<(ModelId, ModelId, String, u32)>,
    pub missing_revisions: HashSet<(ModelId, ModelId, String, u32)>,
}

impl CompletedWork {
    fn requires_missing(&self, need: &Need) -> bool {
        match need {
            Need::InitialJudgment { model_a, model_b, out_idx_a, out_idx_b, prompt, .. } => {
                self.missing_samples.contains(&(model_a.clone(), prompt.clone(), *out_idx_a))
                    || self.missing_samples.contains(&(model_b.clone(), prompt.clone(), *out_idx_b))
            }
            Need::RevisedJudgment {
                model_a,
                model_b,
                out_idx_a,
                out_idx_b,
                fb_model,
                prompt,
                ..
            } => {
                self.missing_revisions.contains(&(model_a.clone(), fb_model.clone(), prompt.clone(), *out_idx_a))
                    || self
                        .missing_revisions
                        .contains(&(model_b.clone(), fb_model.clone(), prompt.clone(), *out_idx_b))
            }
            Need::ImprovementJudgment { writer, fb_model, out_idx, prompt, .. } => {
                self.missing_samples.contains(&(writer.clone(), prompt.clone(), *out_idx))
                    || self.missing_feedback.contains(&(fb_model.clone(), writer.clone(), prompt.clone(), *out_idx))
                    || self
                        .missing_revisions
                        .contains(&(writer.clone(), fb_model.clone(), prompt.clone(), *out_idx))
            }
        }
    }
}

/// Convergence thresholds and caps (§4.3).
#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    /// CI below this (on the Elo scale) is globally precise.
    pub ci_threshold: f64,
    /// Minimum games a model must have played to be considered converged.
    pub min_pairs_per_model: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            ci_threshold: 30.0,
            min_pairs_per_model: 5,
        }
    }
}

impl ConvergenceConfig {
    fn validate(&self) -> Result<(), NeedError> {
        if self.ci_threshold <= 0.0 {
            return Err(NeedError::InvalidConfig("ci_threshold must be positive".into()));
        }
        Ok(())
    }
}

/// Per-dimension convergence detail (§9 resolved open question: exposed).
#[derive(Debug, Clone, Copy, Default)]
pub struct DimensionConvergence {
    pub converged: bool,
    pub max_ci: f64,
}

/// Overall + per-dimension convergence status.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceStatus {
    pub writing: DimensionConvergence,
    pub revised: DimensionConvergence,
    pub feedback: DimensionConvergence,
}

impl ConvergenceStatus {
    pub fn is_converged(&self) -> bool {
        self.writing.converged && self.revised.converged && self.feedback.converged
    }

    pub fn max_ci(&self) -> f64 {
        self.writing
            .max_ci
            .max(self.revised.max_ci)
            .max(self.feedback.max_ci)
    }
}

fn resolved(fit: &WhrFit, a: &ModelId, b: &ModelId, cfg: &ConvergenceConfig) -> bool {
    let Some(ra) = fit.ratings.get(a) else { return false };
    let Some(rb) = fit.ratings.get(b) else { return false };
    if ra.ci95.is_infinite() || rb.ci95.is_infinite() {
        return false;
    }
    let separated = (ra.elo - rb.elo).abs() >= ra.ci95 + rb.ci95;
    let both_precise = ra.ci95 < cfg.ci_threshold && rb.ci95 < cfg.ci_threshold;
    separated || both_precise
}

fn dimension_convergence(
    fit: &WhrFit,
    models: &[ModelId],
    cfg: &ConvergenceConfig,
) -> DimensionConvergence {
    let max_ci = models
        .iter()
        .map(|m| fit.ratings.get(m).map(|r| r.ci95).unwrap_or(f64::INFINITY))
        .fold(0.0f64, |acc, v| if v.is_finite() { acc.max(v) } else { acc.max(0.0) });

    let mut converged = true;
    for m in models {
        let Some(rating) = fit.ratings.get(m) else {
            converged = false;
            continue;
        };
        if rating.games_played < cfg.min_pairs_per_model {
            converged = false;
            continue;
        }
        let precise = rating.ci95 < cfg.ci_threshold;
        let all_pairs_resolved = models
            .iter()
            .filter(|other| *other != m)
            .all(|other| resolved(fit, m, other, cfg));
        if !precise && !all_pairs_resolved {
            converged = false;
        }
    }

    DimensionConvergence { converged, max_ci }
}

/// Evaluate convergence across all three dimensions.
pub fn check_convergence(
    models: &[ModelId],
    writing_fit: &WhrFit,
    revised_fit: &WhrFit,
    feedback_fit: &WhrFit,
    cfg: &ConvergenceConfig,
) -> Result<ConvergenceStatus, NeedError> {
    cfg.validate()?;
    let feedback_models: Vec<ModelId> = models
        .iter()
        .cloned()
        .chain(std::iter::once(ModelId::self_baseline()))
        .collect();
    Ok(ConvergenceStatus {
        writing: dimension_convergence(writing_fit, models, cfg),
        revised: dimension_convergence(revised_fit, models, cfg),
        feedback: dimension_convergence(feedback_fit, &feedback_models, cfg),
    })
}

fn predicted_win_prob(fit: &WhrFit, a: &ModelId, b: &ModelId) -> f64 {
    let ra = fit.ratings.get(a).map(|r| r.log_strength).unwrap_or(0.0);
    let rb = fit.ratings.get(b).map(|r| r.log_strength).unwrap_or(0.0);
    1.0 / (1.0 + (-(ra - rb)).exp())
}

fn score_need(need: &Need, fit: &WhrFit, judge_weight: f64) -> f64 {
    let (a, b) = need.models();
    let p = predicted_win_prob(fit, &a, &b);
    let var_a = fit.variance_natural(&a);
    let var_b = fit.variance_natural(&b);
    if !var_a.is_finite() || !var_b.is_finite() {
        // Zero-games models are maximally informative: treat as the
        // largest finite signal rather than an inf*0 degenerate product.
        return need.dimension().weight() * depth_penalty(need) * judge_weight;
    }
    let base = (var_a + var_b) * p * (1.0 - p);
    base * need.dimension().weight() * depth_penalty(need) * judge_weight
}

fn depth_penalty(need: &Need) -> f64 {
    1.0 / (1.0 + need.depth() as f64)
}

/// Candidate pool plus identification parameters.
pub struct IdentifyParams<'a> {
    pub candidates: Vec<Need>,
    pub writing_fit: &'a WhrFit,
    pub revised_fit: &'a WhrFit,
    pub feedback_fit: &'a WhrFit,
    pub completed: &'a CompletedWork,
    pub judge_weight: &'a dyn Fn(&ModelId) -> f64,
    pub judge_usable: &'a dyn Fn(&ModelId) -> bool,
    pub batch_size: usize,
    pub num_models: usize,
}

type GroupKey = (Dimension, String, String, String);

/// Minimum per-dimension share of a batch, proportional to
/// `Dimension::weight()`, so the lower-weighted dimensions (revised,
/// feedback) still get scheduled instead of being starved behind writing
/// candidates that score higher under the shared weight scaling (§4.3).
/// Uses the largest-remainder method so the quotas sum to exactly
/// `batch_size`.
fn reserve_slots(batch_size: usize, dimensions: &[Dimension]) -> HashMap<Dimension, usize> {
    let total_weight: f64 = dimensions.iter().map(|d| d.weight()).sum();
    let raw: Vec<(Dimension, f64)> = dimensions
        .iter()
        .map(|d| (*d, batch_size as f64 * d.weight() / total_weight))
        .collect();

    let mut quotas: HashMap<Dimension, usize> = raw.iter().map(|(d, v)| (*d, v.floor() as usize)).collect();
    let assigned: usize = quotas.values().sum();
    let mut remainder = batch_size.saturating_sub(assigned);

    let mut by_fraction = raw;
    by_fraction.sort_by(|a, b| b.1.fract().partial_cmp(&a.1.fract()).unwrap_or(std::cmp::Ordering::Equal));
    for (d, _) in by_fraction {
        if remainder == 0 {
            break;
        }
        *quotas.entry(d).or_insert(0) += 1;
        remainder -= 1;
    }
    quotas
}

/// Round-robins across `keys`' groups (in sorted order, for determinism),
/// taking the highest-remaining-score candidate from each group per pass
/// and respecting both `pair_cap` and `limit` additional selections.
fn fill_round_robin(
    mut keys: Vec<GroupKey>,
    groups: &HashMap<GroupKey, Vec<(f64, Need)>>,
    pair_counts: &mut HashMap<GroupKey, usize>,
    cursors: &mut HashMap<GroupKey, usize>,
    selected: &mut Vec<Need>,
    pair_cap: usize,
    limit: usize,
) {
    keys.sort();
    let start = selected.len();
    loop {
        if selected.len() - start >= limit {
            break;
        }
        let mut progressed = false;
        for key in &keys {
            if selected.len() - start >= limit {
                break;
            }
            let count = pair_counts.get(key).copied().unwrap_or(0);
            if count >= pair_cap {
                continue;
            }
            let cursor = cursors.entry(key.clone()).or_insert(0);
            let Some(group) = groups.get(key) else { continue };
            if *cursor >= group.len() {
                continue;
            }
            let (_, need) = group[*cursor].clone();
            *cursor += 1;
            *pair_counts.entry(key.clone()).or_insert(0) += 1;
            selected.push(need);
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
}

/// Produce a prioritized, diversified batch of at most `batch_size`
/// Needs from `candidates` (§4.3).
pub fn identify_needs(params: IdentifyParams<'_>) -> Vec<Need> {
    let pair_cap = (2usize).max(
        (params.batch_size as f64 / params.num_models.max(1) as f64).ceil() as usize,
    );

    let scored: Vec<(f64, Need)> = params
        .candidates
        .into_iter()
        .filter(|n| !params.completed.judgments.contains(&n.judgment_key()))
        .filter(|n| !params.completed.requires_missing(n))
        .filter(|n| (params.judge_usable)(n.judge()))
        .map(|n| {
            let fit = match n.dimension() {
                Dimension::Writing => params.writing_fit,
                Dimension::Revised => params.revised_fit,
                Dimension::Feedback => params.feedback_fit,
            };
            let jw = (params.judge_weight)(n.judge());
            let score = score_need(&n, fit, jw);
            (score, n)
        })
        .collect();

    let mut groups: HashMap<GroupKey, Vec<(f64, Need)>> = HashMap::new();
    for (score, need) in scored {
        groups.entry(need.pair_prompt_key()).or_default().push((score, need));
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    }

    let dimensions = [Dimension::Writing, Dimension::Revised, Dimension::Feedback];
    let reserved = reserve_slots(params.batch_size, &dimensions);

    let mut pair_counts: HashMap<GroupKey, usize> = HashMap::new();
    let mut cursors: HashMap<GroupKey, usize> = HashMap::new();
    let mut selected: Vec<Need> = Vec::new();

    // First, fill each dimension's reserved minimum share from its own
    // groups only, so e.g. feedback candidates can't be crowded out
    // entirely by higher-weighted writing candidates.
    for dim in dimensions {
        let quota = reserved.get(&dim).copied().unwrap_or(0);
        let dim_keys: Vec<GroupKey> = groups.keys().filter(|k| k.0 == dim).cloned().collect();
        fill_round_robin(dim_keys, &groups, &mut pair_counts, &mut cursors, &mut selected, pair_cap, quota);
    }

    // Then spend whatever's left of the batch on the best remaining
    // candidates across every dimension.
    if selected.len() < params.batch_size {
        let remaining = params.batch_size - selected.len();
        let all_keys: Vec<GroupKey> = groups.keys().cloned().collect();
        fill_round_robin(all_keys, &groups, &mut pair_counts, &mut cursors, &mut selected, pair_cap, remaining);
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whr::{self, Game};

    fn m(label: &str) -> ModelId {
        ModelId::new(label)
    }

    fn empty_fit(models: &[ModelId]) -> WhrFit {
        whr::solve(models, &[]).unwrap()
    }

    #[test]
    fn excludes_completed_judgments() {
        let models = vec![m("a"), m("b")];
        let fit = empty_fit(&models);
        let need = Need::InitialJudgment {
            model_a: m("a"),
            model_b: m("b"),
            out_idx_a: 0,
            out_idx_b: 0,
            prompt: "p1".into(),
            judge: m("judge"),
        };
        let mut completed = CompletedWork::default();
        completed.judgments.insert(need.judgment_key());

        let selected = identify_needs(IdentifyParams {
            candidates: vec![need],
            writing_fit: &fit,
            revised_fit: &fit,
            feedback_fit: &fit,
            completed: &completed,
            judge_weight: &|_| 1.0,
            judge_usable: &|_| true,
            batch_size: 10,
            num_models: 2,
        });
        assert!(selected.is_empty());
    }

    #[test]
    fn excludes_needs_requiring_missing_artifacts() {
        let models = vec![m("a"), m("b")];
        let fit = empty_fit(&models);
        let need = Need::InitialJudgment {
            model_a: m("a"),
            model_b: m("b"),
            out_idx_a: 0,
            out_idx_b: 0,
            prompt: "p1".into(),
            judge: m("judge"),
        };
        let mut completed = CompletedWork::default();
        completed.missing_samples.insert((m("a"), "p1".into(), 0));

        let selected = identify_needs(IdentifyParams {
            candidates: vec![need],
            writing_fit: &fit,
            revised_fit: &fit,
            feedback_fit: &fit,
            completed: &completed,
            judge_weight: &|_| 1.0,
            judge_usable: &|_| true,
            batch_size: 10,
            num_models: 2,
        });
        assert!(selected.is_empty());
    }

    #[test]
    fn pair_cap_limits_selection_from_a_single_group() {
        let models = vec![m("a"), m("b")];
        let fit = empty_fit(&models);
        let candidates: Vec<Need> = (0..10)
            .map(|i| Need::InitialJudgment {
                model_a: m("a"),
                model_b: m("b"),
                out_idx_a: i,
                out_idx_b: i,
                prompt: "p1".into(),
                judge: m("judge"),
            })
            .collect();

        let completed = CompletedWork::default();
        let selected = identify_needs(IdentifyParams {
            candidates,
            writing_fit: &fit,
            revised_fit: &fit,
            feedback_fit: &fit,
            completed: &completed,
            judge_weight: &|_| 1.0,
            judge_usable: &|_| true,
            batch_size: 10,
            num_models: 2,
        });
        // pair_cap = max(2, ceil(10/2)) = 5
        assert_eq!(selected.len(), 5);
    }

    #[test]
    fn feedback_dimension_is_not_starved_behind_writing_candidates() {
        let models = vec![m("a"), m("b")];
        let fit = empty_fit(&models);

        // 20 writing candidates on the same pair/prompt (high count, high
        // combined weight) alongside 1 feedback candidate on the same
        // pair/prompt. Under the old 3-tuple grouping these collided into
        // one group and the feedback candidate could lose every slot to
        // higher-weighted writing candidates.
        let mut candidates: Vec<Need> = (0..20)
            .map(|i| Need::InitialJudgment {
                model_a: m("a"),
                model_b: m("b"),
                out_idx_a: i,
                out_idx_b: i,
                prompt: "p1".into(),
                judge: m("judge"),
            })
            .collect();
        candidates.push(Need::ImprovementJudgment {
            writer: m("a"),
            fb_model: m("b"),
            out_idx: 0,
            prompt: "p1".into(),
            judge: m("judge"),
        });

        let completed = CompletedWork::default();
        let selected = identify_needs(IdentifyParams {
            candidates,
            writing_fit: &fit,
            revised_fit: &fit,
            feedback_fit: &fit,
            completed: &completed,
            judge_weight: &|_| 1.0,
            judge_usable: &|_| true,
            batch_size: 6,
            num_models: 2,
        });

        assert!(
            selected.iter().any(|n| n.dimension() == Dimension::Feedback),
            "feedback candidate must be reserved a slot instead of being crowded out: {selected:?}"
        );
    }

    #[test]
    fn fully_resolved_models_converge() {
        let models = vec![m("a"), m("b")];
        let mut games = Vec::new();
        for _ in 0..40 {
            games.push(Game { model_i: m("a"), model_j: m("b"), share_i: 1.0, weight: 1.0 });
        }
        let fit = whr::solve(&models, &games).unwrap();

        let feedback_models = vec![m("a"), m("b"), ModelId::self_baseline()];
        let mut feedback_games = games.clone();
        for _ in 0..40 {
            feedback_games.push(Game {
                model_i: ModelId::self_baseline(),
                model_j: m("a"),
                share_i: 0.0,
                weight: 1.0,
            });
            feedback_games.push(Game {
                model_i: ModelId::self_baseline(),
                model_j: m("b"),
                share_i: 0.0,
                weight: 1.0,
            });
        }
        let feedback_fit = whr::solve(&feedback_models, &feedback_games).unwrap();

        let cfg = ConvergenceConfig { ci_threshold: 30.0, min_pairs_per_model: 5 };
        let status = check_convergence(&models, &fit, &fit, &feedback_fit, &cfg).unwrap();
        assert!(status.is_converged());
    }

    #[test]
    fn zero_games_models_never_converge() {
        let models = vec![m("a"), m("b")];
        let fit = empty_fit(&models);
        let cfg = ConvergenceConfig::default();
        let status = check_convergence(&models, &fit, &fit, &fit, &cfg).unwrap();
        assert!(!status.is_converged());
    }
}
