// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! On-disk cumulative rating store (§3 "Cumulative rating store", §6
//! "Cumulative rating file"): accumulates pairwise win/loss/tie counts
//! across runs and recomputes ratings from scratch on every merge, so
//! the result is independent of the order runs are processed in.

use crate::model::ModelId;
use crate::whr::{self, Game};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate win/loss/tie counts plus a derived rating for one model
/// within one dimension.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelSummary {
    pub rating: f64,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub match_count: u32,
}

/// Aggregate wins/ties between one sorted pair of models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairwiseRecord {
    pub model_a: ModelId,
    pub model_b: ModelId,
    pub wins_a: u32,
    pub wins_b: u32,
    pub ties: u32,
}

/// The pairwise sections of the cumulative store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairwiseSections {
    pub writing: Vec<PairwiseRecord>,
    pub feedback_giving: Vec<PairwiseRecord>,
    pub writing_by_tag: HashMap<String, Vec<PairwiseRecord>>,
}

/// A single entry in the append-only snapshot history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub snapshot: HashMap<ModelId, ModelSummary>,
}

/// The full on-disk cumulative rating store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CumulativeStore {
    pub last_updated: Option<DateTime<Utc>>,
    pub writing: HashMap<ModelId, ModelSummary>,
    pub feedback_giving: HashMap<ModelId, ModelSummary>,
    pub writing_by_tag: HashMap<String, HashMap<ModelId, ModelSummary>>,
    pub pairwise: PairwiseSections,
    pub history: Vec<HistoryEntry>,
}

/// One run's worth of games to fold into the store, grouped the way
/// `merge_run` needs them.
#[derive(Debug, Clone, Default)]
pub struct RunGames {
    pub run_id: String,
    pub writing: Vec<Game>,
    pub feedback_giving: Vec<Game>,
    pub writing_by_tag: HashMap<String, Vec<Game>>,
}

impl CumulativeStore {
    /// Fold `run`'s games into the accumulated pairwise counts, append a
    /// history snapshot, and recompute every rating from scratch. Merge
    /// order never affects the result: pairwise counts are commutative
    /// and ratings are always rebuilt from the full accumulated set.
    pub fn merge_run(&mut self, run: &RunGames, now: DateTime<Utc>) {
        accumulate(&mut self.pairwise.writing, &run.writing);
        accumulate(&mut self.pairwise.feedback_giving, &run.feedback_giving);
        for (tag, games) in &run.writing_by_tag {
            accumulate(self.pairwise.writing_by_tag.entry(tag.clone()).or_default(), games);
        }

        self.recompute();
        self.last_updated = Some(now);
        self.history.push(HistoryEntry {
            run_id: run.run_id.clone(),
            timestamp: now,
            snapshot: self.writing.clone(),
        });
    }

    /// Rebuild every rating map from the current pairwise counts.
    fn recompute(&mut self) {
        self.writing = summarize(&self.pairwise.writing);
        self.feedback_giving = summarize(&self.pairwise.feedback_giving);
        self.writing_by_tag = self
            .pairwise
            .writing_by_tag
            .iter()
            .map(|(tag, records)| (tag.clone(), summarize(records)))
            .collect();
    }
}

/// Add `games`' win/loss/tie outcomes into `records`, inserting a new
/// sorted-pair entry on first occurrence.
fn accumulate(records: &mut Vec<PairwiseRecord>, games: &[Game]) {
    let mut index: HashMap<(ModelId, ModelId), usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| ((r.model_a.clone(), r.model_b.clone()), i))
        .collect();

    for game in games {
        let (a, b, share_a) = if game.model_i <= game.model_j {
            (game.model_i.clone(), game.model_j.clone(), game.share_i)
        } else {
            (game.model_j.clone(), game.model_i.clone(), 1.0 - game.share_i)
        };
        let key = (a.clone(), b.clone());
        let idx = *index.entry(key).or_insert_with(|| {
            records.push(PairwiseRecord { model_a: a.clone(), model_b: b.clone(), wins_a: 0, wins_b: 0, ties: 0 });
            records.len() - 1
        });
        let record = &mut records[idx];
        if share_a >= 1.0 {
            record.wins_a += 1;
        } else if share_a <= 0.0 {
            record.wins_b += 1;
        } else {
            record.ties += 1;
        }
    }
}

/// Expand aggregated pairwise counts back into unit-weight games and
/// solve for ratings, so the cumulative store's ratings stay consistent
/// with the same Bradley-Terry model as a single run's WHR fit.
fn summarize(records: &[PairwiseRecord]) -> HashMap<ModelId, ModelSummary> {
    let mut models: Vec<ModelId> = Vec::new();
    for r in records {
        if !models.contains(&r.model_a) {
            models.push(r.model_a.clone());
        }
        if !models.contains(&r.model_b) {
            models.push(r.model_b.clone());
        }
    }
    if models.is_empty() {
        return HashMap::new();
    }

    let mut games = Vec::new();
    for r in records {
        if r.wins_a > 0 {
            games.push(Game { model_i: r.model_a.clone(), model_j: r.model_b.clone(), share_i: 1.0, weight: r.wins_a as f64 });
        }
        if r.wins_b > 0 {
            games.push(Game { model_i: r.model_a.clone(), model_j: r.model_b.clone(), share_i: 0.0, weight: r.wins_b as f64 });
        }
        if r.ties > 0 {
            games.push(Game { model_i: r.model_a.clone(), model_j: r.model_b.clone(), share_i: 0.5, weight: r.ties as f64 });
        }
    }

    let fit = match whr::solve(&models, &games) {
        Ok(fit) => fit,
        Err(_) => return HashMap::new(),
    };

    let mut summaries: HashMap<ModelId, ModelSummary> = models
        .iter()
        .map(|m| {
            let rating = fit.ratings.get(m).map(|r| r.elo).unwrap_or(1500.0);
            (m.clone(), ModelSummary { rating, wins: 0, losses: 0, ties: 0, match_count: 0 })
        })
        .collect();

    for r in records {
        let total = r.wins_a + r.wins_b + r.ties;
        if let Some(s) = summaries.get_mut(&r.model_a) {
            s.wins += r.wins_a;
            s.losses += r.wins_b;
            s.ties += r.ties;
            s.match_count += total;
        }
        if let Some(s) = summaries.get_mut(&r.model_b) {
            s.wins += r.wins_b;
            s.losses += r.wins_a;
            s.ties += r.ties;
            s.match_count += total;
        }
    }

    summaries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(label: &str) -> ModelId {
        ModelId::new(label)
    }

    fn game(a: &str, b: &str, share_i: f64) -> Game {
        Game { model_i: m(a), model_j: m(b), share_i, weight: 1.0 }
    }

    #[test]
    fn merge_accumulates_wins_across_runs() {
        let mut store = CumulativeStore::default();
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);

        store.merge_run(
            &RunGames { run_id: "r1".into(), writing: vec![game("a", "b", 1.0)], ..Default::default() },
            now,
        );
        store.merge_run(
            &RunGames { run_id: "r2".into(), writing: vec![game("a", "b", 1.0)], ..Default::default() },
            now,
        );

        let record = &store.pairwise.writing[0];
        assert_eq!(record.wins_a, 2);
        assert_eq!(store.writing.get(&m("a")).unwrap().wins, 2);
        assert_eq!(store.history.len(), 2);
    }

    #[test]
    fn merge_order_does_not_affect_final_ratings() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let run1 = RunGames {
            run_id: "r1".into(),
            writing: vec![game("a", "b", 1.0), game("a", "b", 1.0), game("b", "c", 0.5)],
            ..Default::default()
        };
        let run2 = RunGames {
            run_id: "r2".into(),
            writing: vec![game("b", "a", 0.0), game("c", "b", 0.5)],
            ..Default::default()
        };

        let mut forward = CumulativeStore::default();
        forward.merge_run(&run1, now);
        forward.merge_run(&run2, now);

        let mut backward = CumulativeStore::default();
        backward.merge_run(&run2, now);
        backward.merge_run(&run1, now);

        let a_forward = forward.writing.get(&m("a")).unwrap();
        let a_backward = backward.writing.get(&m("a")).unwrap();
        assert!((a_forward.rating - a_backward.rating).abs() < 1e-9);
        assert_eq!(a_forward.wins, a_backward.wins);
        assert_eq!(a_forward.match_count, a_backward.match_count);
    }

    #[test]
    fn tag_breakdown_is_tracked_independently_of_overall_writing() {
        let mut store = CumulativeStore::default();
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let mut by_tag = HashMap::new();
        by_tag.insert("poetry".to_string(), vec![game("a", "b", 1.0)]);

        store.merge_run(
            &RunGames { run_id: "r1".into(), writing: vec![game("a", "b", 0.0)], writing_by_tag: by_tag, ..Default::default() },
            now,
        );

        assert_eq!(store.writing.get(&m("a")).unwrap().losses, 1);
        assert_eq!(store.writing_by_tag.get("poetry").unwrap().get(&m("a")).unwrap().wins, 1);
    }
}
