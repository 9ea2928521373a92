// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Adaptive Loop (§4.5): seed from cache, then repeatedly recompute
//! ratings, identify the most informative next comparisons, and fulfill
//! them via the ensure-cascade, until every dimension converges or the
//! candidate pool is exhausted.

use crate::cache::Cache;
use crate::cascade::{CallCounts, EnsureCascade};
use crate::config::RunConfig;
use crate::error::AdaptiveLoopError;
use crate::generator::Generator;
use crate::judge_quality::{self, JudgeQuality};
use crate::model::{ArtifactId, Feedback, Judgment, JudgmentStage, ModelId, Sample};
use crate::needs::{self, CompletedKey, CompletedWork, ConvergenceConfig, ConvergenceStatus, IdentifyParams, Need};
use crate::whr::{self, WhrFit};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, info_span, Instrument};

/// Upper bound on how often ratings are recomputed within the adaptive
/// loop (§4.5 "rating-recompute throttling ≤ once/100ms").
const RECOMPUTE_INTERVAL: Duration = Duration::from_millis(100);

/// Final ratings plus run telemetry, returned from [`run`] (§6
/// "RunResult", §10 "Supplemented features").
#[derive(Debug, Clone)]
pub struct RunResult {
    pub writing: WhrFit,
    pub revised: WhrFit,
    pub feedback: WhrFit,
    pub convergence: ConvergenceStatus,
    pub rounds_run: u32,
    /// One entry per per-task failure encountered during the run,
    /// carrying a human-readable `(model, stage, message)`-style string.
    pub errors: Vec<String>,
    pub call_counts: CallCounts,
}

/// Drives the full seed + adaptive-iteration pipeline against `config`,
/// using `generator` for artifacts not already in the cache.
pub async fn run(config: &RunConfig, generator: Arc<dyn Generator>) -> Result<RunResult, AdaptiveLoopError> {
    if config.models.is_empty() {
        return Err(AdaptiveLoopError::InvalidConfig("at least one model is required".into()));
    }
    if config.prompts.is_empty() {
        return Err(AdaptiveLoopError::InvalidConfig("at least one prompt is required".into()));
    }

    let cache = Arc::new(Cache::new(config.cache_root.clone()));
    let cascade = EnsureCascade::new(cache, generator);
    let convergence_cfg = ConvergenceConfig {
        ci_threshold: config.ci_threshold,
        min_pairs_per_model: config.min_pairs_per_model,
    };
    let semaphore = Semaphore::new(config.max_concurrent_generator_calls.max(1));

    let mut state = EngineState::default();
    let mut errors = Vec::new();

    seed_from_cache(config, &cascade, &mut state, &semaphore).await;

    let mut rounds_run = 0;
    let mut last_recompute = Instant::now();
    let mut convergence = ConvergenceStatus::default();

    for round in 0..config.max_rounds {
        rounds_run = round + 1;
        let span = info_span!("adaptive_round", round);
        let _guard = span.enter();

        let since_last = last_recompute.elapsed();
        if round > 0 && since_last < RECOMPUTE_INTERVAL {
            tokio::time::sleep(RECOMPUTE_INTERVAL - since_last).await;
        }
        last_recompute = Instant::now();

        let writing_games = whr::tabulate::writing_games(&state.judgments, &state.samples, |j| {
            state.judge_quality.effective_weight(j, &state.samples)
        });
        let revised_games = whr::tabulate::revised_games(&state.judgments, &state.samples, |j| {
            state.judge_quality.effective_weight(j, &state.samples)
        });
        let feedback_games = whr::tabulate::feedback_games(&state.judgments, &state.samples, |j| {
            state.judge_quality.effective_weight(j, &state.samples)
        });

        state.judge_quality = judge_quality::compute(&state.judgments, &state.samples);

        let writing_fit = whr::solve(&config.models, &writing_games)
            .map_err(|e| AdaptiveLoopError::InvalidConfig(format!("writing WHR solve failed: {e}")))?;
        let revised_fit = whr::solve(&config.models, &revised_games)
            .map_err(|e| AdaptiveLoopError::InvalidConfig(format!("revised WHR solve failed: {e}")))?;
        let feedback_models: Vec<ModelId> = config
            .models
            .iter()
            .cloned()
            .chain(std::iter::once(ModelId::self_baseline()))
            .collect();
        let feedback_fit = whr::solve(&feedback_models, &feedback_games)
            .map_err(|e| AdaptiveLoopError::InvalidConfig(format!("feedback WHR solve failed: {e}")))?;

        convergence = needs::check_convergence(&config.models, &writing_fit, &revised_fit, &feedback_fit, &convergence_cfg)?;
        info!(max_ci = convergence.max_ci(), converged = convergence.is_converged(), "round complete");

        if convergence.is_converged() {
            state.writing_fit = writing_fit;
            state.revised_fit = revised_fit;
            state.feedback_fit = feedback_fit;
            break;
        }

        let effective_outputs = config.outputs_per_model.effective(state.current_max_output_count);
        let candidates = generate_candidates(config, effective_outputs);

        let judge_quality = &state.judge_quality;
        let needs = needs::identify_needs(IdentifyParams {
            candidates,
            writing_fit: &writing_fit,
            revised_fit: &revised_fit,
            feedback_fit: &feedback_fit,
            completed: &state.completed,
            judge_weight: &|judge: &ModelId| judge_quality.profile(judge).map(|p| p.quality_weight).unwrap_or(1.0),
            judge_usable: &|judge: &ModelId| judge_quality.is_usable(judge),
            batch_size: config.batch_size,
            num_models: config.models.len().max(1),
        });

        state.writing_fit = writing_fit;
        state.revised_fit = revised_fit;
        state.feedback_fit = feedback_fit;

        if needs.is_empty() {
            break;
        }

        state.current_max_output_count = state.current_max_output_count.max(effective_outputs.saturating_sub(1));

        let results = futures::future::join_all(
            needs.into_iter().map(|need| bounded(&semaphore, fulfill_need(config, &cascade, need))),
        )
        .await;

        for outcome in results {
            match outcome {
                Ok(Some((key, judgment))) => {
                    state.completed.judgments.insert(key);
                    record_judgment(&mut state, judgment);
                }
                Ok(None) => {}
                Err(message) => errors.push(message),
            }
        }
    }

    let call_counts = cascade.counts();
    Ok(RunResult {
        writing: state.writing_fit,
        revised: state.revised_fit,
        feedback: state.feedback_fit,
        convergence,
        rounds_run,
        errors,
        call_counts,
    })
}

#[derive(Default)]
struct EngineState {
    samples: HashMap<ArtifactId, Sample>,
    judgments: Vec<Judgment>,
    completed: CompletedWork,
    judge_quality: JudgeQuality,
    writing_fit: WhrFit,
    revised_fit: WhrFit,
    feedback_fit: WhrFit,
    current_max_output_count: u32,
}

fn record_judgment(state: &mut EngineState, judgment: Judgment) {
    state.judgments.push(judgment);
}

/// Runs `fut` only once a permit is available, bounding how many
/// generator calls are in flight at once within a batch (§4.5's
/// `max_concurrent_generator_calls`).
async fn bounded<F: Future>(semaphore: &Semaphore, fut: F) -> F::Output {
    let _permit = semaphore.acquire().await.expect("semaphore is never closed");
    fut.await
}

/// Phase 1 (§4.5): try every candidate artifact cache-only, in strict
/// layer order (writes before feedback before revisions before
/// judgments), parallel within a layer.
async fn seed_from_cache(config: &RunConfig, cascade: &EnsureCascade, state: &mut EngineState, semaphore: &Semaphore) {
    if config.no_cache {
        return;
    }
    let span = info_span!("seed_from_cache");
    async {
        let seed_outputs = match config.outputs_per_model {
            crate::config::OutputBudget::Fixed(n) => n.max(1),
            crate::config::OutputBudget::Unbounded => 1,
        };

        // Layer 1: initial samples.
        let mut sample_futures = Vec::new();
        for model in &config.models {
            for prompt in &config.prompts {
                for out_idx in 0..seed_outputs {
                    sample_futures
                        .push(bounded(semaphore, cascade.ensure_sample(model, &prompt.id, &prompt.content, out_idx, true)));
                }
            }
        }
        for result in futures::future::join_all(sample_futures).await {
            if let Ok(Some(sample)) = result {
                state.samples.insert(sample.id, sample);
            }
        }

        // Layer 2: feedback, every model on every initial sample.
        let initial_samples: Vec<Sample> = state.samples.values().cloned().collect();
        let mut feedback_futures = Vec::new();
        for sample in &initial_samples {
            let prompt = config.prompts.iter().find(|p| p.id == sample.prompt_id);
            for fb_model in &config.models {
                feedback_futures.push(bounded(
                    semaphore,
                    cascade.ensure_feedback(fb_model, sample, prompt.and_then(|p| p.feedback_prompt.as_deref()), true),
                ));
            }
        }
        let feedback_results = futures::future::join_all(feedback_futures).await;
        let mut feedback_by_key: HashMap<(ModelId, ArtifactId), Feedback> = HashMap::new();
        for result in feedback_results {
            if let Ok(Some(fb)) = result {
                feedback_by_key.insert((fb.source_model.clone(), fb.target_sample_id), fb);
            }
        }

        // Layer 3: revisions, one per (writer, cross-model feedback).
        let mut revision_futures = Vec::new();
        for sample in &initial_samples {
            let prompt = config.prompts.iter().find(|p| p.id == sample.prompt_id);
            for fb_model in &config.models {
                if fb_model == &sample.model {
                    continue;
                }
                if let Some(fb) = feedback_by_key.get(&(fb_model.clone(), sample.id)) {
                    revision_futures.push(bounded(
                        semaphore,
                        cascade.ensure_revision(
                            &sample.model,
                            sample,
                            fb,
                            &sample.prompt_id,
                            prompt.and_then(|p| p.revision_prompt.as_deref()),
                            true,
                        ),
                    ));
                }
            }
        }
        let mut revisions = Vec::new();
        for result in futures::future::join_all(revision_futures).await {
            if let Ok(Some(revision)) = result {
                revisions.push(revision.clone());
                state.samples.insert(revision.id, revision);
            }
        }

        // Layer 4: judgments across the three stages.
        let mut judgment_futures = Vec::new();
        for prompt in &config.prompts {
            let prompt_samples: Vec<&Sample> = initial_samples.iter().filter(|s| s.prompt_id == prompt.id).collect();
            for (i, a) in prompt_samples.iter().enumerate() {
                for b in prompt_samples.iter().skip(i + 1) {
                    if a.output_index != b.output_index {
                        continue;
                    }
                    for judge in config.effective_judges() {
                        judgment_futures.push(bounded(
                            semaphore,
                            cascade.ensure_judgment(
                                judge,
                                &prompt.id,
                                &prompt.judging_criteria,
                                a,
                                b,
                                JudgmentStage::Initial,
                                true,
                            ),
                        ));
                    }
                }
            }

            for revision in revisions.iter().filter(|r| r.prompt_id == prompt.id) {
                let Some(origin) = &revision.origin else { continue };
                let Some(original) = state.samples.get(&origin.origin_sample_id) else { continue };
                for judge in config.effective_judges() {
                    judgment_futures.push(bounded(
                        semaphore,
                        cascade.ensure_judgment(
                            judge,
                            &prompt.id,
                            &prompt.judging_criteria,
                            original,
                            revision,
                            JudgmentStage::Improvement,
                            true,
                        ),
                    ));
                }
            }
        }
        for result in futures::future::join_all(judgment_futures).await {
            if let Ok(Some(judgment)) = result {
                state.completed.judgments.insert(completed_key_for(&judgment, &state.samples));
                record_judgment(state, judgment);
            }
        }
    }
    .instrument(span)
    .await;
}

fn completed_key_for(judgment: &Judgment, samples: &HashMap<ArtifactId, Sample>) -> CompletedKey {
    let model_a = samples.get(&judgment.sample_a).map(|s| s.model.clone()).unwrap_or_else(ModelId::self_baseline);
    let model_b = samples.get(&judgment.sample_b).map(|s| s.model.clone()).unwrap_or_else(ModelId::self_baseline);
    let (models, out_idxs) = if model_a <= model_b {
        (
            (model_a, model_b),
            (
                samples.get(&judgment.sample_a).map(|s| s.output_index).unwrap_or(0),
                samples.get(&judgment.sample_b).map(|s| s.output_index).unwrap_or(0),
            ),
        )
    } else {
        (
            (model_b, model_a),
            (
                samples.get(&judgment.sample_b).map(|s| s.output_index).unwrap_or(0),
                samples.get(&judgment.sample_a).map(|s| s.output_index).unwrap_or(0),
            ),
        )
    };
    let fb_context = samples
        .get(&judgment.sample_b)
        .and_then(|s| s.origin.as_ref())
        .map(|o| o.feedback_model.to_string())
        .unwrap_or_default();
    CompletedKey {
        stage: judgment.stage,
        models,
        fb_context,
        prompt: judgment.prompt_id.clone(),
        judge: judgment.judge_model.clone(),
        out_idxs,
    }
}

/// Generate the static universe of candidate Needs reachable under the
/// current output budget (§4.3; missing-artifact and completed-work
/// filtering happens inside `identify_needs`).
fn generate_candidates(config: &RunConfig, effective_outputs: u32) -> Vec<Need> {
    let mut candidates = Vec::new();
    let judges = config.effective_judges();

    for prompt in &config.prompts {
        for (i, model_a) in config.models.iter().enumerate() {
            for model_b in config.models.iter().skip(i + 1) {
                for out_idx_a in 0..effective_outputs {
                    for out_idx_b in 0..effective_outputs {
                        for judge in judges {
                            candidates.push(Need::InitialJudgment {
                                model_a: model_a.clone(),
                                model_b: model_b.clone(),
                                out_idx_a,
                                out_idx_b,
                                prompt: prompt.id.clone(),
                                judge: judge.clone(),
                            });
                        }
                    }
                }

                for fb_model in &config.models {
                    if fb_model == model_a || fb_model == model_b {
                        continue;
                    }
                    for out_idx_a in 0..effective_outputs {
                        for out_idx_b in 0..effective_outputs {
                            for judge in judges {
                                candidates.push(Need::RevisedJudgment {
                                    model_a: model_a.clone(),
                                    model_b: model_b.clone(),
                                    out_idx_a,
                                    out_idx_b,
                                    fb_model: fb_model.clone(),
                                    prompt: prompt.id.clone(),
                                    judge: judge.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }

        for writer in &config.models {
            for fb_model in &config.models {
                if fb_model == writer {
                    continue;
                }
                for out_idx in 0..effective_outputs {
                    for judge in judges {
                        candidates.push(Need::ImprovementJudgment {
                            writer: writer.clone(),
                            fb_model: fb_model.clone(),
                            out_idx,
                            prompt: prompt.id.clone(),
                            judge: judge.clone(),
                        });
                    }
                }
            }
        }
    }

    candidates
}

/// Fulfill a single Need: ensure every prerequisite artifact (sample,
/// feedback, revision), strictly in dependency order, then the judgment
/// itself. Returns the landed judgment's completed-work key alongside
/// it, or a human-readable error on failure (never propagated further:
/// per-need failures are collected, not aborting, per §5/§7).
async fn fulfill_need(
    config: &RunConfig,
    cascade: &EnsureCascade,
    need: Need,
) -> Result<Option<(CompletedKey, Judgment)>, String> {
    let prompt = config
        .prompts
        .iter()
        .find(|p| p.id == need_prompt_id(&need))
        .ok_or_else(|| format!("unknown prompt for need: {need:?}"))?;

    match need {
        Need::InitialJudgment { model_a, model_b, out_idx_a, out_idx_b, prompt: ref prompt_id, judge } => {
            let sa = require(cascade.ensure_sample(&model_a, prompt_id, &prompt.content, out_idx_a, false).await)?;
            let sb = require(cascade.ensure_sample(&model_b, prompt_id, &prompt.content, out_idx_b, false).await)?;
            let judgment = require(
                cascade
                    .ensure_judgment(&judge, prompt_id, &prompt.judging_criteria, &sa, &sb, JudgmentStage::Initial, false)
                    .await,
            )?;
            let key = CompletedKey {
                stage: JudgmentStage::Initial,
                models: sorted_pair(model_a, model_b),
                fb_context: String::new(),
                prompt: prompt_id.clone(),
                judge,
                out_idxs: (out_idx_a.min(out_idx_b), out_idx_a.max(out_idx_b)),
            };
            Ok(Some((key, judgment)))
        }
        Need::ImprovementJudgment { writer, fb_model, out_idx, prompt: ref prompt_id, judge } => {
            let original = require(cascade.ensure_sample(&writer, prompt_id, &prompt.content, out_idx, false).await)?;
            let feedback = require(
                cascade
                    .ensure_feedback(&fb_model, &original, prompt.feedback_prompt.as_deref(), false)
                    .await,
            )?;
            let revision = require(
                cascade
                    .ensure_revision(&writer, &original, &feedback, prompt_id, prompt.revision_prompt.as_deref(), false)
                    .await,
            )?;
            let judgment = require(
                cascade
                    .ensure_judgment(
                        &judge,
                        prompt_id,
                        &prompt.judging_criteria,
                        &original,
                        &revision,
                        JudgmentStage::Improvement,
                        false,
                    )
                    .await,
            )?;
            let key = CompletedKey {
                stage: JudgmentStage::Improvement,
                models: sorted_pair(writer, fb_model),
                fb_context: String::new(),
                prompt: prompt_id.clone(),
                judge,
                out_idxs: (out_idx, out_idx),
            };
            Ok(Some((key, judgment)))
        }
        Need::RevisedJudgment { model_a, model_b, out_idx_a, out_idx_b, fb_model, prompt: ref prompt_id, judge } => {
            let original_a = require(cascade.ensure_sample(&model_a, prompt_id, &prompt.content, out_idx_a, false).await)?;
            let original_b = require(cascade.ensure_sample(&model_b, prompt_id, &prompt.content, out_idx_b, false).await)?;
            let feedback_a = require(
                cascade
                    .ensure_feedback(&fb_model, &original_a, prompt.feedback_prompt.as_deref(), false)
                    .await,
            )?;
            let feedback_b = require(
                cascade
                    .ensure_feedback(&fb_model, &original_b, prompt.feedback_prompt.as_deref(), false)
                    .await,
            )?;
            let revision_a = require(
                cascade
                    .ensure_revision(&model_a, &original_a, &feedback_a, prompt_id, prompt.revision_prompt.as_deref(), false)
                    .await,
            )?;
            let revision_b = require(
                cascade
                    .ensure_revision(&model_b, &original_b, &feedback_b, prompt_id, prompt.revision_prompt.as_deref(), false)
                    .await,
            )?;
            let judgment = require(
                cascade
                    .ensure_judgment(
                        &judge,
                        prompt_id,
                        &prompt.judging_criteria,
                        &revision_a,
                        &revision_b,
                        JudgmentStage::Revised,
                        false,
                    )
                    .await,
            )?;
            let key = CompletedKey {
                stage: JudgmentStage::Revised,
                models: sorted_pair(model_a, model_b),
                fb_context: fb_model.to_string(),
                prompt: prompt_id.clone(),
                judge,
                out_idxs: (out_idx_a.min(out_idx_b), out_idx_a.max(out_idx_b)),
            };
            Ok(Some((key, judgment)))
        }
    }
}

fn sorted_pair(a: ModelId, b: ModelId) -> (ModelId, ModelId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn need_prompt_id(need: &Need) -> &str {
    match need {
        Need::InitialJudgment { prompt, .. } => prompt,
        Need::ImprovementJudgment { prompt, .. } => prompt,
        Need::RevisedJudgment { prompt, .. } => prompt,
    }
}

fn require<T>(result: Result<Option<T>, crate::error::CascadeError>) -> Result<T, String> {
    match result {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err("artifact unavailable (cache-only path returned nothing)".into()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{FinishReason, GenerateRequest, GenerateResponse, GeneratorError, GeneratorUsage};
    use crate::model::Prompt;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tempfile::TempDir;

    struct ScriptedGenerator {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, GeneratorError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let text = if request.structured_schema.is_some() {
                // Favor A deterministically so convergence is reachable.
                r#"{"winner": "a", "reasoning": "stronger argument"}"#.to_string()
            } else {
                format!("draft text from {}", request.model)
            };
            Ok(GenerateResponse { text, finish_reason: FinishReason::Stop, usage: GeneratorUsage::default() })
        }
    }

    fn test_prompt(id: &str) -> Prompt {
        Prompt {
            id: id.to_string(),
            content: "Write a short story about the sea.".to_string(),
            tags: vec!["fiction".to_string()],
            judging_criteria: vec!["clarity".to_string()],
            feedback_prompt: None,
            revision_prompt: None,
            max_words: None,
        }
    }

    #[tokio::test]
    async fn run_exhausts_or_converges_without_panicking() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::default()
            .with_models(vec![ModelId::new("writer-a"), ModelId::new("writer-b")])
            .with_judges(vec![ModelId::new("judge-1")])
            .with_prompts(vec![test_prompt("p1")])
            .with_cache_root(dir.path())
            .with_batch_size(8);

        let generator = Arc::new(ScriptedGenerator { calls: AtomicUsize::new(0) });
        let result = run(&config, generator).await.unwrap();

        assert!(result.rounds_run >= 1);
        assert!(result.writing.ratings.contains_key(&ModelId::new("writer-a")));
        assert!(result.writing.ratings.contains_key(&ModelId::new("writer-b")));
    }

    #[tokio::test]
    async fn rerun_on_fully_cached_scenario_makes_no_generator_calls() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::default()
            .with_models(vec![ModelId::new("writer-a"), ModelId::new("writer-b")])
            .with_judges(vec![ModelId::new("judge-1")])
            .with_prompts(vec![test_prompt("p1")])
            .with_cache_root(dir.path())
            .with_batch_size(8);

        let generator = Arc::new(ScriptedGenerator { calls: AtomicUsize::new(0) });
        let first = run(&config, generator.clone()).await.unwrap();
        assert!(first.call_counts.samples_generated > 0 || first.call_counts.judgments_generated > 0);

        let second = run(&config, generator.clone()).await.unwrap();
        assert_eq!(second.call_counts.samples_generated, 0);
        assert_eq!(second.call_counts.feedback_generated, 0);
        assert_eq!(second.call_counts.revisions_generated, 0);
        assert_eq!(second.call_counts.judgments_generated, 0);
    }

    struct ConcurrencyTrackingGenerator {
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Generator for ConcurrencyTrackingGenerator {
        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, GeneratorError> {
            let now = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            self.high_water.fetch_max(now, AtomicOrdering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
            let text = if request.structured_schema.is_some() {
                r#"{"winner": "a", "reasoning": "stronger argument"}"#.to_string()
            } else {
                format!("draft text from {}", request.model)
            };
            Ok(GenerateResponse { text, finish_reason: FinishReason::Stop, usage: GeneratorUsage::default() })
        }
    }

    #[tokio::test]
    async fn seed_phase_respects_max_concurrent_generator_calls() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::default()
            .with_models(vec![
                ModelId::new("writer-a"),
                ModelId::new("writer-b"),
                ModelId::new("writer-c"),
                ModelId::new("writer-d"),
            ])
            .with_judges(vec![ModelId::new("judge-1")])
            .with_prompts(vec![test_prompt("p1"), test_prompt("p2")])
            .with_cache_root(dir.path())
            .with_batch_size(8)
            .with_max_concurrent_generator_calls(2);

        let generator = Arc::new(ConcurrencyTrackingGenerator {
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        });
        run(&config, generator.clone()).await.unwrap();

        let peak = generator.high_water.load(AtomicOrdering::SeqCst);
        assert!(peak <= 2, "generator concurrency exceeded the configured bound: peak was {peak}");
    }

    #[tokio::test]
    async fn rejects_empty_model_list() {
        let config = RunConfig::default().with_prompts(vec![test_prompt("p1")]);
        let generator = Arc::new(ScriptedGenerator { calls: AtomicUsize::new(0) });
        assert!(run(&config, generator).await.is_err());
    }
}
