// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Whole-History Rating inference: Bradley-Terry posterior mode under a
//! Gaussian prior, solved by Newton's method, with Elo-scale confidence
//! intervals read off the inverse expected-information matrix (§4.2).

pub mod linalg;
pub mod tabulate;

use crate::error::WhrError;
use crate::model::ModelId;
use linalg::Matrix;
use std::collections::HashMap;

/// Natural-log-odds-to-Elo scale factor: `400 / ln(10)`.
pub const ELO_SCALE: f64 = 173.71800722732164;

/// Prior variance on log-strengths, in natural units (§4.2).
pub const PRIOR_VARIANCE: f64 = 0.25;

/// Smallest edge weight a judgment's effective weight is clamped to.
pub const MIN_EDGE_WEIGHT: f64 = 0.1;

const MAX_ITERS: u32 = 50;
const CONVERGENCE_TOL: f64 = 1e-6;

/// A single weighted pairwise comparison fed into the solver. `share_i`
/// is model_i's observed win share against model_j (1.0, 0.0, or 0.5 for
/// a tie); `weight` is the judgment's effective edge weight (§4.6).
#[derive(Debug, Clone)]
pub struct Game {
    pub model_i: ModelId,
    pub model_j: ModelId,
    pub share_i: f64,
    pub weight: f64,
}

/// Posterior summary for a single model.
#[derive(Debug, Clone, Copy)]
pub struct ModelRating {
    /// Posterior-mode log-strength, recentered so the field mean is 0.
    pub log_strength: f64,
    /// `1500 + ELO_SCALE * log_strength`.
    pub elo: f64,
    /// Half-width of the centered 95% confidence interval, on the Elo
    /// scale. `f64::INFINITY` for a model with zero games.
    pub ci95: f64,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub games_played: u32,
}

/// The solved rating for every model in the input universe.
#[derive(Debug, Clone, Default)]
pub struct WhrFit {
    pub ratings: HashMap<ModelId, ModelRating>,
}

impl WhrFit {
    /// In-natural-units posterior variance, recovered from a finite CI.
    /// Used by need identification's information-gain scoring. Models
    /// with an infinite CI report `f64::INFINITY` here too.
    pub fn variance_natural(&self, model: &ModelId) -> f64 {
        let Some(rating) = self.ratings.get(model) else {
            return f64::INFINITY;
        };
        if !rating.ci95.is_finite() {
            return f64::INFINITY;
        }
        let ci95_natural = rating.ci95 / ELO_SCALE;
        (ci95_natural / 1.96).powi(2)
    }
}

struct Adjacency {
    // (opponent index, observed share for this model, weight)
    edges: Vec<Vec<(usize, f64, f64)>>,
}

/// Solve for posterior-mode log-strengths and confidence intervals given
/// `games` and the full universe of `models` (including zero-game
/// models, which must still appear in the output with an infinite CI).
pub fn solve(models: &[ModelId], games: &[Game]) -> Result<WhrFit, WhrError> {
    let n = models.len();
    let mut index: HashMap<ModelId, usize> = HashMap::with_capacity(n);
    for (i, m) in models.iter().enumerate() {
        index.insert(m.clone(), i);
    }

    let mut adjacency = Adjacency {
        edges: vec![Vec::new(); n],
    };
    let mut wins = vec![0u32; n];
    let mut losses = vec![0u32; n];
    let mut ties = vec![0u32; n];

    for game in games {
        let (Some(&i), Some(&j)) = (index.get(&game.model_i), index.get(&game.model_j)) else {
            continue;
        };
        if i == j {
            continue;
        }
        adjacency.edges[i].push((j, game.share_i, game.weight));
        adjacency.edges[j].push((i, 1.0 - game.share_i, game.weight));

        if game.share_i == 1.0 {
            wins[i] += 1;
            losses[j] += 1;
        } else if game.share_i == 0.0 {
            losses[i] += 1;
            wins[j] += 1;
        } else {
            ties[i] += 1;
            ties[j] += 1;
        }
    }

    let mut r = vec![0.0f64; n];
    let mut converged = n == 0;
    let mut last_max_delta = 0.0f64;

    for _ in 0..MAX_ITERS {
        let mut max_delta = 0.0f64;
        for i in 0..n {
            let mut g = -r[i] / PRIOR_VARIANCE;
            let mut h = 1.0 / PRIOR_VARIANCE;
            for &(j, share_i, weight) in &adjacency.edges[i] {
                let p = sigmoid(r[i] - r[j]);
                g += weight * (share_i - p);
                h += weight * p * (1.0 - p);
            }
            let delta = g / h;
            r[i] += delta;
            max_delta = max_delta.max(delta.abs());
        }
        last_max_delta = max_delta;
        if max_delta < CONVERGENCE_TOL {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(WhrError::DidNotConverge {
            iters: MAX_ITERS,
            max_delta: last_max_delta,
        });
    }

    if n > 0 {
        let mean = crate::stats::mean(&r);
        for v in r.iter_mut() {
            *v -= mean;
        }
    }

    let mut info = Matrix::zeros(n);
    for i in 0..n {
        let mut h_ii = 1.0 / PRIOR_VARIANCE;
        for &(j, _, weight) in &adjacency.edges[i] {
            let p = sigmoid(r[i] - r[j]);
            let term = weight * p * (1.0 - p);
            h_ii += term;
            info.add(i, j, -term);
        }
        info.set(i, i, h_ii);
    }

    let variances: Vec<f64> = if n == 0 {
        Vec::new()
    } else {
        let inv = info.invert()?;
        (0..n).map(|i| inv.get(i, i)).collect()
    };

    let mut ratings = HashMap::with_capacity(n);
    for (i, model) in models.iter().enumerate() {
        let games_played = wins[i] + losses[i] + ties[i];
        let ci95 = if games_played == 0 {
            f64::INFINITY
        } else {
            1.96 * variances[i].max(0.0).sqrt() * ELO_SCALE
        };
        ratings.insert(
            model.clone(),
            ModelRating {
                log_strength: r[i],
                elo: 1500.0 + ELO_SCALE * r[i],
                ci95,
                wins: wins[i],
                losses: losses[i],
                ties: ties[i],
                games_played,
            },
        );
    }

    Ok(WhrFit { ratings })
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
