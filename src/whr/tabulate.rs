// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Converts judgments into per-dimension WHR games via the sample-to-
//! model mapping in §4.2.

use super::Game;
use crate::model::{ArtifactId, Judgment, JudgmentStage, ModelId, Sample};
use std::collections::HashMap;

/// Build the writing-dimension store: one game per `Initial`-stage
/// judgment, both sides mapped to their writer model.
pub fn writing_games(
    judgments: &[Judgment],
    samples: &HashMap<ArtifactId, Sample>,
    weight_of: impl Fn(&Judgment) -> f64,
) -> Vec<Game> {
    direct_games(judgments, samples, JudgmentStage::Initial, &weight_of)
}

/// Build the revised-dimension store: one game per `Revised`-stage
/// judgment, both sides mapped to their writer model.
pub fn revised_games(
    judgments: &[Judgment],
    samples: &HashMap<ArtifactId, Sample>,
    weight_of: impl Fn(&Judgment) -> f64,
) -> Vec<Game> {
    direct_games(judgments, samples, JudgmentStage::Revised, &weight_of)
}

fn direct_games(
    judgments: &[Judgment],
    samples: &HashMap<ArtifactId, Sample>,
    stage: JudgmentStage,
    weight_of: &impl Fn(&Judgment) -> f64,
) -> Vec<Game> {
    judgments
        .iter()
        .filter(|j| j.stage == stage)
        .filter_map(|j| {
            let sample_a = samples.get(&j.sample_a)?;
            let sample_b = samples.get(&j.sample_b)?;
            Some(Game {
                model_i: sample_a.model.clone(),
                model_j: sample_b.model.clone(),
                share_i: j.winner.share_a(),
                weight: weight_of(j),
            })
        })
        .collect()
}

/// Build the feedback-dimension store: one game per `Improvement`-stage
/// judgment, framed as feedback-provider vs the `"self"` baseline
/// (§4.2: "the original side is mapped to self").
pub fn feedback_games(
    judgments: &[Judgment],
    samples: &HashMap<ArtifactId, Sample>,
    weight_of: impl Fn(&Judgment) -> f64,
) -> Vec<Game> {
    judgments
        .iter()
        .filter(|j| j.stage == JudgmentStage::Improvement)
        .filter_map(|j| {
            // sample_a is the original, unrevised sample; sample_b is the
            // revision, whose provenance names the feedback provider.
            let original = samples.get(&j.sample_a)?;
            let revision = samples.get(&j.sample_b)?;
            let origin = revision.origin.as_ref()?;
            let _ = original;
            Some(Game {
                model_i: ModelId::self_baseline(),
                model_j: origin.feedback_model.clone(),
                share_i: j.winner.share_a(),
                weight: weight_of(j),
            })
        })
        .collect()
}
