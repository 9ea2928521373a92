// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Judge-quality reliability weights and bias correction (§4.6).
//!
//! Three factors compose into a judgment's effective WHR edge weight:
//! the judge's agreement-derived reliability, a self-preference
//! correction, and a reported (not composed) position-bias estimate.

use crate::model::{ArtifactId, Judgment, ModelId, Sample, Winner};
use std::collections::HashMap;

use crate::whr::MIN_EDGE_WEIGHT;

/// Agreement-rate half-life (in decisive-judgment count) used to damp
/// quality-weight swings in small samples.
pub const AGREEMENT_HALF_LIFE: f64 = 8.0;

/// Self-preference bias is only corrected once at least this many
/// decisive self-judgments have been observed.
pub const MIN_SELF_JUDGMENT_SAMPLES: u32 = 8;

/// Self-preference bias below this magnitude is treated as noise.
pub const BIAS_DEAD_ZONE: f64 = 0.05;

/// Judges whose normalized quality weight falls below this are excluded
/// from candidate generation (unless they're the only judge left).
pub const PRUNE_THRESHOLD: f64 = 0.2;

/// Per-judge quality, bias, and position-bias summary.
#[derive(Debug, Clone, Copy)]
pub struct JudgeProfile {
    /// Normalized agreement-derived reliability weight, in `[0, 1]`.
    pub quality_weight: f64,
    /// `self_win_rate - expected_win_rate`, only meaningful when
    /// `self_sample_count >= MIN_SELF_JUDGMENT_SAMPLES`.
    pub bias_delta: f64,
    /// Count of decisive self-judgments behind `bias_delta`.
    pub self_sample_count: u32,
    /// Presented-A win rate deviation from 0.5; reported only.
    pub position_bias: f64,
}

impl JudgeProfile {
    /// Whether the self-preference correction applies to this judge.
    pub fn has_self_bias_correction(&self) -> bool {
        self.bias_delta > BIAS_DEAD_ZONE && self.self_sample_count >= MIN_SELF_JUDGMENT_SAMPLES
    }

    /// The multiplicative correction factor for a self-judgment where
    /// this judge voted for its own sample: `max(w_min, 1 - biasDelta)`.
    pub fn self_bias_correction_factor(&self) -> f64 {
        if self.has_self_bias_correction() {
            (1.0 - self.bias_delta).max(MIN_EDGE_WEIGHT)
        } else {
            1.0
        }
    }
}

/// Computed per-judge profiles plus a helper to price any judgment's
/// effective WHR edge weight.
#[derive(Debug, Clone, Default)]
pub struct JudgeQuality {
    profiles: HashMap<ModelId, JudgeProfile>,
}

impl JudgeQuality {
    /// Profile for `judge`, if any judgments from it were tabulated.
    pub fn profile(&self, judge: &ModelId) -> Option<JudgeProfile> {
        self.profiles.get(judge).copied()
    }

    /// Whether `judge` is above the prune threshold, or is the last
    /// surviving judge (in which case pruning would leave no candidates,
    /// so it is kept regardless of its weight).
    pub fn is_usable(&self, judge: &ModelId) -> bool {
        if self.profiles.len() <= 1 {
            return true;
        }
        self.profiles
            .get(judge)
            .map(|p| p.quality_weight >= PRUNE_THRESHOLD)
            .unwrap_or(true)
    }

    /// The effective WHR edge weight for `judgment`, composing the
    /// judge's quality weight with a self-preference correction when the
    /// judgment involves the judge's own writing and it voted for itself
    /// (§4.6 "Weight composition").
    pub fn effective_weight(
        &self,
        judgment: &Judgment,
        samples: &HashMap<ArtifactId, Sample>,
    ) -> f64 {
        let quality = self
            .profiles
            .get(&judgment.judge_model)
            .map(|p| p.quality_weight)
            .unwrap_or(1.0);

        let bias = self
            .profiles
            .get(&judgment.judge_model)
            .filter(|_| voted_for_self(judgment, &judgment.judge_model, samples))
            .map(|p| p.self_bias_correction_factor())
            .unwrap_or(1.0);

        (quality * bias).max(MIN_EDGE_WEIGHT)
    }
}

/// Whether `judgment.judge_model` voted for a sample authored by itself.
fn voted_for_self(
    judgment: &Judgment,
    judge: &ModelId,
    samples: &HashMap<ArtifactId, Sample>,
) -> bool {
    let winning_sample = match judgment.winner {
        Winner::A => judgment.sample_a,
        Winner::B => judgment.sample_b,
        Winner::Tie => return false,
    };
    samples
        .get(&winning_sample)
        .map(|s| &s.model == judge)
        .unwrap_or(false)
}

/// Whether either side of `judgment` was authored by `judge` (i.e. this
/// is a self-judgment eligible for bias tabulation).
fn involves_self(judgment: &Judgment, judge: &ModelId, samples: &HashMap<ArtifactId, Sample>) -> bool {
    let a_is_self = samples.get(&judgment.sample_a).map(|s| &s.model == judge).unwrap_or(false);
    let b_is_self = samples.get(&judgment.sample_b).map(|s| &s.model == judge).unwrap_or(false);
    a_is_self || b_is_self
}

/// Decayed agreement rate: `rate * (1 - exp(-n / half_life))` (§9
/// decision: exponential decay, damping small-sample swings toward 0
/// rather than trusting a handful of lucky/unlucky agreements).
fn decayed_agreement(raw_rate: f64, n: u32) -> f64 {
    raw_rate * (1.0 - (-(n as f64) / AGREEMENT_HALF_LIFE).exp())
}

/// Compute quality weights and bias profiles for every judge appearing
/// in `judgments`, given the sample index needed to resolve provenance.
pub fn compute(judgments: &[Judgment], samples: &HashMap<ArtifactId, Sample>) -> JudgeQuality {
    let judges: Vec<ModelId> = {
        let mut set: Vec<ModelId> = judgments.iter().map(|j| j.judge_model.clone()).collect();
        set.sort();
        set.dedup();
        set
    };

    // Group judgments by the pair they adjudicate, so we can find pairs
    // multiple judges voted on.
    let mut by_pair: HashMap<(ArtifactId, ArtifactId, crate::model::JudgmentStage), Vec<&Judgment>> =
        HashMap::new();
    for j in judgments {
        let key = sorted_pair_key(j);
        by_pair.entry(key).or_default().push(j);
    }

    let mut raw_agreement: HashMap<ModelId, (f64, u32)> = HashMap::new();
    for votes in by_pair.values() {
        if votes.len() < 2 {
            continue;
        }
        let consensus = weighted_majority(votes);
        let Some(consensus) = consensus else { continue };
        for vote in votes {
            let entry = raw_agreement.entry(vote.judge_model.clone()).or_insert((0.0, 0));
            let agrees = normalized_winner(vote) == consensus;
            entry.0 += if agrees { 1.0 } else { 0.0 };
            entry.1 += 1;
        }
    }

    let mut weights: HashMap<ModelId, f64> = HashMap::new();
    for judge in &judges {
        let weight = match raw_agreement.get(judge) {
            Some(&(agree_sum, n)) if n > 0 => decayed_agreement(agree_sum / n as f64, n),
            _ => 1.0, // no overlap data: assume full trust until proven otherwise.
        };
        weights.insert(judge.clone(), weight);
    }
    let max_weight = weights.values().cloned().fold(0.0f64, f64::max).max(f64::EPSILON);
    for w in weights.values_mut() {
        *w /= max_weight;
    }

    let mut profiles = HashMap::new();
    for judge in &judges {
        let (self_wins, self_total, expected_sum) = tabulate_self_bias(judge, judgments, samples, &by_pair);
        let (position_agree, position_total) = tabulate_position_bias(judge, judgments);

        let bias_delta = if self_total > 0 {
            let observed = self_wins as f64 / self_total as f64;
            let expected = if self_total > 0 {
                expected_sum / self_total as f64
            } else {
                0.5
            };
            observed - expected
        } else {
            0.0
        };

        let position_bias = if position_total > 0 {
            (position_agree as f64 / position_total as f64) - 0.5
        } else {
            0.0
        };

        profiles.insert(
            judge.clone(),
            JudgeProfile {
                quality_weight: weights.get(judge).copied().unwrap_or(1.0),
                bias_delta,
                self_sample_count: self_total,
                position_bias,
            },
        );
    }

    JudgeQuality { profiles }
}

fn sorted_pair_key(j: &Judgment) -> (ArtifactId, ArtifactId, crate::model::JudgmentStage) {
    if j.sample_a.0 <= j.sample_b.0 {
        (j.sample_a, j.sample_b, j.stage)
    } else {
        (j.sample_b, j.sample_a, j.stage)
    }
}

/// A judgment's winner, normalized to the `(min-id, max-id)` ordering
/// used as the grouping key, so votes from differently-oriented queries
/// compare correctly.
fn normalized_winner(j: &Judgment) -> Winner {
    if j.sample_a.0 <= j.sample_b.0 {
        j.winner
    } else {
        j.winner.flipped()
    }
}

/// Weighted-majority consensus among a pair's votes; ties broken by
/// total weight (all votes here are pre-judge-quality, so "weight" is
/// just raw vote count — this runs before weights exist).
fn weighted_majority(votes: &[&Judgment]) -> Option<Winner> {
    let mut a = 0.0;
    let mut b = 0.0;
    let mut tie = 0.0;
    for v in votes {
        match normalized_winner(v) {
            Winner::A => a += 1.0,
            Winner::B => b += 1.0,
            Winner::Tie => tie += 1.0,
        }
    }
    if a >= b && a >= tie {
        Some(Winner::A)
    } else if b >= a && b >= tie {
        Some(Winner::B)
    } else {
        Some(Winner::Tie)
    }
}

/// For `judge`, tabulate self-judgments: decisive verdicts on a pair
/// containing one of its own writer samples. Returns
/// `(self_wins, self_total, sum_of_expected_rates)` where the expected
/// rate per pair is the decisive win rate among *other* judges voting on
/// the same model-pair group.
fn tabulate_self_bias(
    judge: &ModelId,
    judgments: &[Judgment],
    samples: &HashMap<ArtifactId, Sample>,
    by_pair: &HashMap<(ArtifactId, ArtifactId, crate::model::JudgmentStage), Vec<&Judgment>>,
) -> (u32, u32, f64) {
    let mut self_wins = 0u32;
    let mut self_total = 0u32;
    let mut expected_sum = 0.0;

    for j in judgments {
        if &j.judge_model != judge {
            continue;
        }
        if j.winner == Winner::Tie {
            continue;
        }
        if !involves_self(j, judge, samples) {
            continue;
        }
        self_total += 1;
        if voted_for_self(j, judge, samples) {
            self_wins += 1;
        }

        let key = sorted_pair_key(j);
        let others: Vec<&&Judgment> = by_pair
            .get(&key)
            .into_iter()
            .flatten()
            .filter(|v| &v.judge_model != judge && v.winner != Winner::Tie)
            .collect();
        let expected = if others.is_empty() {
            0.5
        } else {
            let self_side_wins = others
                .iter()
                .filter(|v| voted_for_self(v, judge, samples))
                .count();
            self_side_wins as f64 / others.len() as f64
        };
        expected_sum += expected;
    }

    (self_wins, self_total, expected_sum)
}

/// For `judge`, count decisive judgments where the *presented* A side
/// (before undoing any position swap) won, vs total decisive judgments.
fn tabulate_position_bias(judge: &ModelId, judgments: &[Judgment]) -> (u32, u32) {
    let mut presented_a_wins = 0u32;
    let mut total = 0u32;
    for j in judgments {
        if &j.judge_model != judge || j.winner == Winner::Tie {
            continue;
        }
        total += 1;
        // Canonical `winner` already has the swap undone; re-derive what
        // was actually presented as "A" to the generator.
        let presented_winner = if j.position_swapped {
            j.winner.flipped()
        } else {
            j.winner
        };
        if presented_winner == Winner::A {
            presented_a_wins += 1;
        }
    }
    (presented_a_wins, total)
}

/// A stub hook for future position-bias composition into edge weights.
/// Per the resolved open question (§9), position bias is reported only;
/// this always returns a neutral `1.0` multiplier.
pub fn position_bias_factor(_profile: &JudgeProfile) -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JudgmentStage, Usage};

    fn writer_sample(model: &str) -> Sample {
        Sample::new_initial(ModelId::new(model), "p1", 0, "text", Usage::default())
    }

    fn judgment(judge: &str, a: ArtifactId, b: ArtifactId, winner: Winner) -> Judgment {
        Judgment {
            id: ArtifactId::new(),
            judge_model: ModelId::new(judge),
            prompt_id: "p1".into(),
            sample_a: a,
            sample_b: b,
            winner,
            stage: JudgmentStage::Initial,
            usage: Usage::default(),
            reasoning: String::new(),
            position_swapped: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn agreeing_judge_outweighs_disagreeing_judge() {
        let sa = writer_sample("model-a");
        let sb = writer_sample("model-b");
        let mut samples = HashMap::new();
        samples.insert(sa.id, sa.clone());
        samples.insert(sb.id, sb.clone());

        // Three judges vote on the same pair; two agree (A wins), one
        // dissents (B wins).
        let judgments = vec![
            judgment("judge-1", sa.id, sb.id, Winner::A),
            judgment("judge-2", sa.id, sb.id, Winner::A),
            judgment("judge-3", sa.id, sb.id, Winner::B),
        ];

        let quality = compute(&judgments, &samples);
        let w1 = quality.profile(&ModelId::new("judge-1")).unwrap().quality_weight;
        let w3 = quality.profile(&ModelId::new("judge-3")).unwrap().quality_weight;
        assert!(w1 > w3);
    }

    #[test]
    fn effective_weight_is_clamped_to_min() {
        let sa = writer_sample("model-a");
        let sb = writer_sample("model-b");
        let mut samples = HashMap::new();
        samples.insert(sa.id, sa.clone());
        samples.insert(sb.id, sb.clone());

        let j = judgment("judge-1", sa.id, sb.id, Winner::A);
        let quality = compute(std::slice::from_ref(&j), &samples);
        let weight = quality.effective_weight(&j, &samples);
        assert!((MIN_EDGE_WEIGHT..=1.0).contains(&weight));
    }

    #[test]
    fn self_preference_is_not_corrected_below_dead_zone_sample_count() {
        let sa = writer_sample("judge-1"); // judge is also the writer
        let sb = writer_sample("model-b");
        let mut samples = HashMap::new();
        samples.insert(sa.id, sa.clone());
        samples.insert(sb.id, sb.clone());

        // Only a couple of self-judgments: below MIN_SELF_JUDGMENT_SAMPLES.
        let judgments = vec![
            judgment("judge-1", sa.id, sb.id, Winner::A),
            judgment("judge-1", sa.id, sb.id, Winner::A),
        ];
        let quality = compute(&judgments, &samples);
        let profile = quality.profile(&ModelId::new("judge-1")).unwrap();
        assert!(!profile.has_self_bias_correction());
    }

    #[test]
    fn position_bias_factor_is_always_neutral() {
        let profile = JudgeProfile {
            quality_weight: 1.0,
            bias_delta: 0.3,
            self_sample_count: 20,
            position_bias: 0.4,
        };
        assert_eq!(position_bias_factor(&profile), 1.0);
    }
}
