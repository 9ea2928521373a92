// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Content-addressed, append-only on-disk artifact store (§4.1).
//!
//! Four categories — writes, feedback, revisions, judgments — each laid out
//! under `root` so that re-running the engine against the same cache tree
//! deduplicates everything it can and only calls the generator for what is
//! actually missing.

pub mod hash;

use crate::error::CacheError;
use crate::model::{ArtifactId, Feedback, Judgment, JudgmentStage, ModelId, Sample};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// A report of what a trim operation removed, for logging/testing.
#[derive(Debug, Default, Clone)]
pub struct TrimReport {
    /// Cache-IDs of deleted writes.
    pub deleted_writes: Vec<ArtifactId>,
    /// Cache-IDs of deleted feedback.
    pub deleted_feedback: Vec<ArtifactId>,
    /// Cache-IDs of deleted revisions.
    pub deleted_revisions: Vec<ArtifactId>,
    /// Number of judgment files deleted.
    pub deleted_judgments: usize,
}

/// A report of what a combine operation did, for logging/testing.
#[derive(Debug, Default, Clone)]
pub struct CombineReport {
    /// Number of write entries copied into the target model-key.
    pub writes_copied: usize,
    /// Number of feedback entries copied.
    pub feedback_copied: usize,
    /// Number of revision entries copied.
    pub revisions_copied: usize,
    /// Number of judgment files copied.
    pub judgments_copied: usize,
}

/// The on-disk, content-addressed cache.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open (or prepare to create) a cache tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory backing this cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn writes_prompt_dir(&self, model_key: &str, prompt_hash: &str) -> PathBuf {
        self.root.join("writes").join(model_key).join(prompt_hash)
    }

    fn write_path(&self, model_key: &str, prompt_hash: &str, index: u32) -> PathBuf {
        self.writes_prompt_dir(model_key, prompt_hash)
            .join(format!("sample_{index}.json"))
    }

    fn feedback_dir(&self, fb_model_key: &str) -> PathBuf {
        self.root.join("feedback").join(fb_model_key)
    }

    fn feedback_path(&self, fb_model_key: &str, write_cache_id: ArtifactId) -> PathBuf {
        self.feedback_dir(fb_model_key)
            .join(format!("{write_cache_id}.json"))
    }

    fn revisions_dir(&self, writer_key: &str) -> PathBuf {
        self.root.join("revisions").join(writer_key)
    }

    fn revision_path(&self, writer_key: &str, feedback_cache_id: ArtifactId) -> PathBuf {
        self.revisions_dir(writer_key)
            .join(format!("{feedback_cache_id}.json"))
    }

    fn judgments_dir(&self, judge_key: &str) -> PathBuf {
        self.root.join("judgments").join(judge_key)
    }

    fn judgment_path(&self, judge_key: &str, pair_hash: &str) -> PathBuf {
        self.judgments_dir(judge_key).join(format!("{pair_hash}.json"))
    }

    // ---- writes ----------------------------------------------------

    /// All cached writes for `(model, prompt_text)`, ordered by output
    /// index. Corrupt files are skipped, not raised (§7).
    pub async fn get_writes(&self, model: &ModelId, prompt_text: &str) -> Vec<Sample> {
        let dir = self.writes_prompt_dir(&model.as_path_key(), &hash::prompt_hash(prompt_text));
        let mut entries: Vec<(u32, Sample)> = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(_) => return Vec::new(),
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(idx_str) = name.strip_prefix("sample_") else {
                continue;
            };
            let Ok(idx) = idx_str.parse::<u32>() else {
                continue;
            };
            match read_json::<Sample>(&path).await {
                Ok(sample) => entries.push((idx, sample)),
                Err(_) => warn!(path = %path.display(), "skipping corrupt cached write"),
            }
        }
        entries.sort_by_key(|(idx, _)| *idx);
        entries.into_iter().map(|(_, s)| s).collect()
    }

    /// Persist a write at a given output index. Idempotent; at the same
    /// index under concurrent writers, the last writer wins (the adaptive
    /// loop's in-flight dedup map is responsible for avoiding that race).
    pub async fn add_write(
        &self,
        model: &ModelId,
        prompt_text: &str,
        index: u32,
        sample: &Sample,
    ) -> Result<(), CacheError> {
        let path = self.write_path(
            &model.as_path_key(),
            &hash::prompt_hash(prompt_text),
            index,
        );
        write_json_atomic(&path, sample).await
    }

    // ---- feedback ----------------------------------------------------

    /// Cached feedback from `fb_model` targeting `write_cache_id`, if any.
    pub async fn get_feedback(
        &self,
        fb_model: &ModelId,
        write_cache_id: ArtifactId,
    ) -> Option<Feedback> {
        let path = self.feedback_path(&fb_model.as_path_key(), write_cache_id);
        read_json_or_none(&path).await
    }

    /// Persist feedback keyed by `(fb_model, write_cache_id)`.
    pub async fn add_feedback(
        &self,
        fb_model: &ModelId,
        write_cache_id: ArtifactId,
        feedback: &Feedback,
    ) -> Result<(), CacheError> {
        let path = self.feedback_path(&fb_model.as_path_key(), write_cache_id);
        write_json_atomic(&path, feedback).await
    }

    // ---- revisions -----------------------------------------------------

    /// Cached revision by `writer` keyed on `feedback_cache_id`, if any.
    pub async fn get_revision(
        &self,
        writer: &ModelId,
        feedback_cache_id: ArtifactId,
    ) -> Option<Sample> {
        let path = self.revision_path(&writer.as_path_key(), feedback_cache_id);
        read_json_or_none(&path).await
    }

    /// Persist a revision keyed by `(writer, feedback_cache_id)`.
    pub async fn add_revision(
        &self,
        writer: &ModelId,
        feedback_cache_id: ArtifactId,
        sample: &Sample,
    ) -> Result<(), CacheError> {
        let path = self.revision_path(&writer.as_path_key(), feedback_cache_id);
        write_json_atomic(&path, sample).await
    }

    // ---- judgments -----------------------------------------------------

    /// Cached judgment for `(judge, stage, cid_a, cid_b)`, re-oriented so
    /// `winner`/`position_swapped` are relative to the caller's ordering
    /// regardless of how it was originally stored.
    pub async fn get_judgment(
        &self,
        judge: &ModelId,
        stage: JudgmentStage,
        cid_a: ArtifactId,
        cid_b: ArtifactId,
    ) -> Option<Judgment> {
        let pair_hash = hash::pair_hash(stage, cid_a, cid_b);
        let path = self.judgment_path(&judge.as_path_key(), &pair_hash);
        let stored: Judgment = read_json_or_none(&path).await?;
        Some(stored.reoriented_for(cid_a))
    }

    /// Persist a judgment. The stored file always normalizes `sample_a`/
    /// `sample_b` to sorted order so `(A, B)` and `(B, A)` queries land on
    /// the same file.
    pub async fn add_judgment(&self, judge: &ModelId, judgment: &Judgment) -> Result<(), CacheError> {
        let pair_hash = hash::pair_hash(judgment.stage, judgment.sample_a, judgment.sample_b);
        let normalized = if judgment.sample_a.0 <= judgment.sample_b.0 {
            judgment.clone()
        } else {
            judgment.reoriented_for(judgment.sample_b)
        };
        let path = self.judgment_path(&judge.as_path_key(), &pair_hash);
        write_json_atomic(&path, &normalized).await
    }

    // ---- maintenance ---------------------------------------------------

    /// Delete every write at index `>= max_outputs` for `model_key`,
    /// cascading through feedback, revisions, and judgments that reference
    /// the deleted artifacts (§4.1 "Trim operation").
    pub async fn trim(&self, model: &ModelId, max_outputs: u32) -> Result<TrimReport, CacheError> {
        let mut report = TrimReport::default();
        let model_key = model.as_path_key();
        let writes_root = self.root.join("writes").join(&model_key);

        let prompt_dirs = list_dirs(&writes_root).await?;
        for prompt_dir in prompt_dirs {
            let samples = list_json_files(&prompt_dir).await?;
            for (path, idx) in samples {
                let Some(idx) = idx else { continue };
                if idx < max_outputs {
                    continue;
                }
                if let Ok(sample) = read_json::<Sample>(&path).await {
                    remove_file(&path).await?;
                    report.deleted_writes.push(sample.id);
                }
            }
        }

        let write_tombstones: HashSet<ArtifactId> = report.deleted_writes.iter().copied().collect();

        // Cascade: feedback targeting a deleted write, across every
        // feedback-model directory.
        let feedback_root = self.root.join("feedback");
        for fb_dir in list_dirs(&feedback_root).await.unwrap_or_default() {
            for (path, _) in list_json_files(&fb_dir).await.unwrap_or_default() {
                if let Ok(feedback) = read_json::<Feedback>(&path).await {
                    if write_tombstones.contains(&feedback.target_sample_id) {
                        remove_file(&path).await?;
                        report.deleted_feedback.push(feedback.id);
                    }
                }
            }
        }

        let feedback_tombstones: HashSet<ArtifactId> =
            report.deleted_feedback.iter().copied().collect();

        // Cascade: revisions built on a deleted feedback, across every
        // writer directory.
        let revisions_root = self.root.join("revisions");
        for writer_dir in list_dirs(&revisions_root).await.unwrap_or_default() {
            for (path, _) in list_json_files(&writer_dir).await.unwrap_or_default() {
                if let Ok(revision) = read_json::<Sample>(&path).await {
                    let Some(origin) = &revision.origin else {
                        continue;
                    };
                    if feedback_tombstones.contains(&origin.feedback_id) {
                        remove_file(&path).await?;
                        report.deleted_revisions.push(revision.id);
                    }
                }
            }
        }

        // Judgment cleanup: any deleted write/feedback/revision id paired
        // with any surviving id, for every stage, yields a pair-hash whose
        // file (if present, under any judge directory) must go.
        let mut deleted_ids: HashSet<ArtifactId> = HashSet::new();
        deleted_ids.extend(report.deleted_writes.iter().copied());
        deleted_ids.extend(report.deleted_feedback.iter().copied());
        deleted_ids.extend(report.deleted_revisions.iter().copied());

        let surviving_ids = self.all_sample_ids().await?;
        let judgments_root = self.root.join("judgments");
        let stages = [
            JudgmentStage::Initial,
            JudgmentStage::Revised,
            JudgmentStage::Improvement,
        ];
        let mut condemned_hashes: HashSet<String> = HashSet::new();
        for &deleted in &deleted_ids {
            for &surviving in &surviving_ids {
                for &stage in &stages {
                    condemned_hashes.insert(hash::pair_hash(stage, deleted, surviving));
                }
            }
            for &other in &deleted_ids {
                for &stage in &stages {
                    condemned_hashes.insert(hash::pair_hash(stage, deleted, other));
                }
            }
        }

        for judge_dir in list_dirs(&judgments_root).await.unwrap_or_default() {
            for (path, _) in list_json_files(&judge_dir).await.unwrap_or_default() {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if condemned_hashes.contains(stem) {
                        remove_file(&path).await?;
                        report.deleted_judgments += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Every sample id (write or revision) currently in the cache.
    async fn all_sample_ids(&self) -> Result<HashSet<ArtifactId>, CacheError> {
        let mut ids = HashSet::new();
        for root_name in ["writes", "revisions"] {
            let base = self.root.join(root_name);
            for model_dir in list_dirs(&base).await.unwrap_or_default() {
                // writes has an extra prompt-hash level; revisions does not.
                let leaf_dirs = if root_name == "writes" {
                    list_dirs(&model_dir).await.unwrap_or_default()
                } else {
                    vec![model_dir]
                };
                for dir in leaf_dirs {
                    for (path, _) in list_json_files(&dir).await.unwrap_or_default() {
                        if let Ok(sample) = read_json::<Sample>(&path).await {
                            ids.insert(sample.id);
                        }
                    }
                }
            }
        }
        Ok(ids)
    }

    /// Merge `src`'s artifacts into `target`'s model-key (§4.1 "Combine
    /// operation").
    pub async fn combine(&self, src: &ModelId, target: &ModelId) -> Result<CombineReport, CacheError> {
        let mut report = CombineReport::default();
        let src_key = src.as_path_key();
        let target_key = target.as_path_key();

        // Writes: renumber to avoid index collisions, skipping source
        // entries whose cache-id already exists at target.
        let src_writes_root = self.root.join("writes").join(&src_key);
        for prompt_dir in list_dirs(&src_writes_root).await.unwrap_or_default() {
            let prompt_hash = prompt_dir
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let target_dir = self.root.join("writes").join(&target_key).join(&prompt_hash);
            let target_files = list_json_files(&target_dir).await.unwrap_or_default();
            let mut existing_ids: HashSet<ArtifactId> = HashSet::new();
            for (path, _) in &target_files {
                if let Ok(sample) = read_json::<Sample>(path).await {
                    existing_ids.insert(sample.id);
                }
            }
            let mut next_index = target_files
                .iter()
                .filter_map(|(_, idx)| *idx)
                .max()
                .map(|m| m + 1)
                .unwrap_or(0);

            for (path, _) in list_json_files(&prompt_dir).await.unwrap_or_default() {
                if let Ok(sample) = read_json::<Sample>(&path).await {
                    if existing_ids.contains(&sample.id) {
                        continue;
                    }
                    let dest = target_dir.join(format!("sample_{next_index}.json"));
                    write_json_atomic(&dest, &sample).await?;
                    next_index += 1;
                    report.writes_copied += 1;
                }
            }
        }

        // Feedback: src is the feedback-giver (fb-model-key), so only
        // feedback/<src-key>/*.json is in scope. Copy by cache-id filename
        // into feedback/<target-key>, skipping duplicates and remembering
        // discarded->kept remaps for write-targets that already had
        // feedback from the target key.
        let mut discarded_to_kept: Vec<(ArtifactId, ArtifactId)> = Vec::new();
        let feedback_src_dir = self.root.join("feedback").join(&src_key);
        let feedback_target_dir = self.root.join("feedback").join(&target_key);
        for (path, _) in list_json_files(&feedback_src_dir).await.unwrap_or_default() {
            let Ok(feedback) = read_json::<Feedback>(&path).await else {
                continue;
            };
            let dest = feedback_target_dir.join(path.file_name().unwrap());
            if dest.exists() {
                // Target already has feedback on this write: keep the
                // existing one, remap the discarded id.
                if let Ok(kept) = read_json::<Feedback>(&dest).await {
                    discarded_to_kept.push((feedback.id, kept.id));
                }
                continue;
            }
            write_json_atomic(&dest, &feedback).await?;
            report.feedback_copied += 1;
        }

        // Revisions: src is the writer-key, so only revisions/<src-key>/
        // *.json is in scope. Copy by cache-id filename into
        // revisions/<target-key>, skipping duplicates.
        let revisions_root = self.root.join("revisions");
        let revisions_src_dir = revisions_root.join(&src_key);
        for (path, _) in list_json_files(&revisions_src_dir).await.unwrap_or_default() {
            let Ok(revision) = read_json::<Sample>(&path).await else {
                continue;
            };
            let revisions_target_dir = revisions_root.join(&target_key);
            let dest = revisions_target_dir.join(path.file_name().unwrap());
            if !dest.exists() {
                write_json_atomic(&dest, &revision).await?;
                report.revisions_copied += 1;
            }
        }

        // Reconcile discarded feedback ids against every writer's
        // revisions (a revision can be keyed on a feedback id given by any
        // model, not just src/target): re-key if no revision exists yet
        // for the kept id, else delete to preserve "at most one revision
        // per (writer, feedback)".
        for writer_dir in list_dirs(&revisions_root).await.unwrap_or_default() {
            for (discarded, kept) in &discarded_to_kept {
                let discarded_path = writer_dir.join(format!("{discarded}.json"));
                let kept_path = writer_dir.join(format!("{kept}.json"));
                if discarded_path.exists() {
                    if kept_path.exists() {
                        remove_file(&discarded_path).await?;
                    } else if let Ok(revision) = read_json::<Sample>(&discarded_path).await {
                        write_json_atomic(&kept_path, &revision).await?;
                        remove_file(&discarded_path).await?;
                        report.revisions_copied += 1;
                    }
                }
            }
        }

        // Judgments: src is the judge-key, so only judgments/<src-key>/
        // *.json is in scope. Copy by pair-hash filename into
        // judgments/<target-key>, skipping duplicates.
        let judgments_root = self.root.join("judgments");
        let judgments_src_dir = judgments_root.join(&src_key);
        let judgments_target_dir = judgments_root.join(&target_key);
        for (path, _) in list_json_files(&judgments_src_dir).await.unwrap_or_default() {
            let dest = judgments_target_dir.join(path.file_name().unwrap());
            if !dest.exists() {
                if let Ok(judgment) = read_json::<Judgment>(&path).await {
                    write_json_atomic(&dest, &judgment).await?;
                    report.judgments_copied += 1;
                }
            }
        }

        Ok(report)
    }
}

async fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
    let mut out = Vec::new();
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(_) => return Ok(out),
    };
    while let Ok(Some(entry)) = rd.next_entry().await {
        let meta = entry.metadata().await.map_err(|source| CacheError::ListDir {
            path: dir.display().to_string(),
            source,
        })?;
        if meta.is_dir() {
            out.push(entry.path());
        }
    }
    Ok(out)
}

/// List `*.json` files in `dir`, returning `(path, Some(index))` when the
/// stem is `sample_<N>`, else `(path, None)`.
async fn list_json_files(dir: &Path) -> Result<Vec<(PathBuf, Option<u32>)>, CacheError> {
    let mut out = Vec::new();
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(_) => return Ok(out),
    };
    while let Ok(Some(entry)) = rd.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if path
            .to_str()
            .map(|s| s.contains(".tmp."))
            .unwrap_or(false)
        {
            continue;
        }
        let idx = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("sample_"))
            .and_then(|s| s.parse::<u32>().ok());
        out.push((path, idx));
    }
    Ok(out)
}

async fn remove_file(path: &Path) -> Result<(), CacheError> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|source| CacheError::Remove {
            path: path.display().to_string(),
            source,
        })
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ()> {
    let bytes = tokio::fs::read(path).await.map_err(|_| ())?;
    serde_json::from_slice(&bytes).map_err(|_| ())
}

/// Corrupt/missing files read as `None` rather than an error (§7).
async fn read_json_or_none<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match read_json(path).await {
        Ok(v) => Some(v),
        Err(()) => {
            if path.exists() {
                warn!(path = %path.display(), "skipping corrupt cache file");
            }
            None
        }
    }
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| CacheError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension(format!("json.tmp.{}", Uuid::new_v4()));
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|source| CacheError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| CacheError::Write {
            path: path.display().to_string(),
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RevisionOrigin, Usage, Winner};
    use tempfile::TempDir;

    fn model(label: &str) -> ModelId {
        ModelId::new(label)
    }

    #[tokio::test]
    async fn add_then_get_write_roundtrips() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path());
        let m = model("writer-a");
        let sample = Sample::new_initial(m.clone(), "p1", 0, "hello", Usage::default());
        cache.add_write(&m, "prompt text", 0, &sample).await.unwrap();

        let writes = cache.get_writes(&m, "prompt text").await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].id, sample.id);
    }

    #[tokio::test]
    async fn concurrent_writes_at_distinct_indices_both_land() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path());
        let m = model("writer-a");
        let s0 = Sample::new_initial(m.clone(), "p1", 0, "zero", Usage::default());
        let s1 = Sample::new_initial(m.clone(), "p1", 1, "one", Usage::default());

        let (r0, r1) = tokio::join!(
            cache.add_write(&m, "prompt text", 0, &s0),
            cache.add_write(&m, "prompt text", 1, &s1)
        );
        r0.unwrap();
        r1.unwrap();

        let writes = cache.get_writes(&m, "prompt text").await;
        assert_eq!(writes.len(), 2);
    }

    #[tokio::test]
    async fn judgment_roundtrip_flips_on_swapped_query() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path());
        let judge = model("judge-1");
        let a = ArtifactId::new();
        let b = ArtifactId::new();

        let judgment = Judgment {
            id: ArtifactId::new(),
            judge_model: judge.clone(),
            prompt_id: "p1".into(),
            sample_a: a,
            sample_b: b,
            winner: Winner::A,
            stage: JudgmentStage::Initial,
            usage: Usage::default(),
            reasoning: "a is better".into(),
            position_swapped: false,
            created_at: chrono::Utc::now(),
        };
        cache.add_judgment(&judge, &judgment).await.unwrap();

        let direct = cache
            .get_judgment(&judge, JudgmentStage::Initial, a, b)
            .await
            .unwrap();
        assert_eq!(direct.winner, Winner::A);

        let swapped = cache
            .get_judgment(&judge, JudgmentStage::Initial, b, a)
            .await
            .unwrap();
        assert_eq!(swapped.winner, Winner::B);
        assert_eq!(swapped.sample_a, b);
        assert_eq!(swapped.sample_b, a);
    }

    #[tokio::test]
    async fn corrupt_write_file_is_skipped_not_raised() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path());
        let m = model("writer-a");
        let prompt_dir = dir
            .path()
            .join("writes")
            .join(m.as_path_key())
            .join(hash::prompt_hash("prompt text"));
        tokio::fs::create_dir_all(&prompt_dir).await.unwrap();
        tokio::fs::write(prompt_dir.join("sample_0.json"), b"{not json")
            .await
            .unwrap();

        let writes = cache.get_writes(&m, "prompt text").await;
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn trim_cascades_through_feedback_revisions_and_judgments() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path());
        let writer = model("writer-a");
        let fb_model = model("judge-1");

        let mut writes = Vec::new();
        for i in 0..5u32 {
            let s = Sample::new_initial(writer.clone(), "p1", i, format!("draft {i}"), Usage::default());
            cache.add_write(&writer, "prompt text", i, &s).await.unwrap();
            writes.push(s);
        }

        // Feedback + revision only for the writes that will be trimmed
        // (index >= 2), so we can assert the cascade reached them.
        for s in writes.iter().skip(2) {
            let fb = Feedback::new(fb_model.clone(), s.id, "needs work", Usage::default());
            cache.add_feedback(&fb_model, s.id, &fb).await.unwrap();

            let origin = RevisionOrigin {
                origin_sample_id: s.id,
                feedback_id: fb.id,
                feedback_model: fb_model.clone(),
            };
            let revision =
                Sample::new_revision(writer.clone(), "p1", s.output_index, "revised", origin, Usage::default());
            cache.add_revision(&writer, fb.id, &revision).await.unwrap();

            let judgment = Judgment {
                id: ArtifactId::new(),
                judge_model: fb_model.clone(),
                prompt_id: "p1".into(),
                sample_a: s.id,
                sample_b: revision.id,
                winner: crate::model::Winner::B,
                stage: JudgmentStage::Improvement,
                usage: Usage::default(),
                reasoning: "better".into(),
                position_swapped: false,
                created_at: chrono::Utc::now(),
            };
            cache.add_judgment(&fb_model, &judgment).await.unwrap();
        }

        let report = cache.trim(&writer, 2).await.unwrap();
        assert_eq!(report.deleted_writes.len(), 3);
        assert_eq!(report.deleted_feedback.len(), 3);
        assert_eq!(report.deleted_revisions.len(), 3);
        assert_eq!(report.deleted_judgments, 3);

        let remaining = cache.get_writes(&writer, "prompt text").await;
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn combine_migrates_src_roles_into_target_without_touching_unrelated_models() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path());
        let src = model("model-src");
        let target = model("model-target");
        let other = model("model-other");
        let unrelated = model("model-unrelated");

        // src as writer.
        let s_src = Sample::new_initial(src.clone(), "p1", 0, "src draft", Usage::default());
        cache.add_write(&src, "prompt text", 0, &s_src).await.unwrap();

        // other as writer; src gives feedback on it (src's feedback-giver role).
        let s_other = Sample::new_initial(other.clone(), "p1", 0, "other draft", Usage::default());
        cache.add_write(&other, "prompt text", 0, &s_other).await.unwrap();
        let fb_src_on_other = Feedback::new(src.clone(), s_other.id, "from src", Usage::default());
        cache.add_feedback(&src, s_other.id, &fb_src_on_other).await.unwrap();

        // other gives feedback on src's write; src revises it (src's reviser role).
        let fb_other_on_src = Feedback::new(other.clone(), s_src.id, "from other", Usage::default());
        cache.add_feedback(&other, s_src.id, &fb_other_on_src).await.unwrap();
        let origin = RevisionOrigin {
            origin_sample_id: s_src.id,
            feedback_id: fb_other_on_src.id,
            feedback_model: other.clone(),
        };
        let revision_src = Sample::new_revision(src.clone(), "p1", 0, "src revised", origin, Usage::default());
        cache.add_revision(&src, fb_other_on_src.id, &revision_src).await.unwrap();

        // src as judge.
        let judgment_src = Judgment {
            id: ArtifactId::new(),
            judge_model: src.clone(),
            prompt_id: "p1".into(),
            sample_a: s_src.id,
            sample_b: s_other.id,
            winner: Winner::A,
            stage: JudgmentStage::Initial,
            usage: Usage::default(),
            reasoning: "src judged".into(),
            position_swapped: false,
            created_at: chrono::Utc::now(),
        };
        cache.add_judgment(&src, &judgment_src).await.unwrap();

        // Entirely unrelated model with its own revision, to prove combine
        // does not sweep every writer directory in the cache.
        let s_unrelated = Sample::new_initial(unrelated.clone(), "p1", 0, "unrelated draft", Usage::default());
        cache.add_write(&unrelated, "prompt text", 0, &s_unrelated).await.unwrap();
        let fb_other_on_unrelated = Feedback::new(other.clone(), s_unrelated.id, "from other", Usage::default());
        cache
            .add_feedback(&other, s_unrelated.id, &fb_other_on_unrelated)
            .await
            .unwrap();
        let unrelated_origin = RevisionOrigin {
            origin_sample_id: s_unrelated.id,
            feedback_id: fb_other_on_unrelated.id,
            feedback_model: other.clone(),
        };
        let revision_unrelated = Sample::new_revision(
            unrelated.clone(),
            "p1",
            0,
            "unrelated revised",
            unrelated_origin,
            Usage::default(),
        );
        cache
            .add_revision(&unrelated, fb_other_on_unrelated.id, &revision_unrelated)
            .await
            .unwrap();

        cache.combine(&src, &target).await.unwrap();

        // Target now has src's write.
        let target_writes = cache.get_writes(&target, "prompt text").await;
        assert_eq!(target_writes.len(), 1);
        assert_eq!(target_writes[0].id, s_src.id);

        // Target now has src's feedback-giver role (feedback on s_other).
        assert!(cache.get_feedback(&target, s_other.id).await.is_some());

        // Target now has src's reviser role (revision keyed by fb_other_on_src).
        let migrated_revision = cache.get_revision(&target, fb_other_on_src.id).await;
        assert!(migrated_revision.is_some());
        assert_eq!(migrated_revision.unwrap().id, revision_src.id);

        // Target now has src's judge role.
        let migrated_judgment = cache
            .get_judgment(&target, JudgmentStage::Initial, s_src.id, s_other.id)
            .await;
        assert!(migrated_judgment.is_some());

        // The unrelated model's revision must survive untouched.
        let still_there = cache.get_revision(&unrelated, fb_other_on_unrelated.id).await;
        assert!(
            still_there.is_some(),
            "combine must not delete revisions belonging to models outside (src, target)"
        );
        assert_eq!(still_there.unwrap().id, revision_unrelated.id);

        // src's own copies remain (combine copies, it does not delete source).
        assert!(cache.get_feedback(&src, s_other.id).await.is_some());
        assert!(cache.get_revision(&src, fb_other_on_src.id).await.is_some());
    }

    #[tokio::test]
    async fn combine_dedupes_conflicting_feedback_and_rekeys_dependent_revisions() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path());
        let src = model("model-src");
        let target = model("model-target");
        let writer = model("writer-a");

        let shared_write = Sample::new_initial(writer.clone(), "p1", 0, "draft", Usage::default());
        cache.add_write(&writer, "prompt text", 0, &shared_write).await.unwrap();

        // Both src and target already gave feedback on the same write.
        let fb_from_src = Feedback::new(src.clone(), shared_write.id, "from src", Usage::default());
        cache.add_feedback(&src, shared_write.id, &fb_from_src).await.unwrap();
        let fb_from_target = Feedback::new(target.clone(), shared_write.id, "from target", Usage::default());
        cache
            .add_feedback(&target, shared_write.id, &fb_from_target)
            .await
            .unwrap();

        // A revision exists keyed by the soon-to-be-discarded src feedback id.
        let origin = RevisionOrigin {
            origin_sample_id: shared_write.id,
            feedback_id: fb_from_src.id,
            feedback_model: src.clone(),
        };
        let revision = Sample::new_revision(writer.clone(), "p1", 0, "revised from src", origin, Usage::default());
        cache.add_revision(&writer, fb_from_src.id, &revision).await.unwrap();

        cache.combine(&src, &target).await.unwrap();

        // Target keeps its own feedback; src's is discarded, not copied.
        let kept = cache.get_feedback(&target, shared_write.id).await.unwrap();
        assert_eq!(kept.id, fb_from_target.id);

        // The revision keyed by the discarded id is re-keyed to the kept id,
        // since the writer had no revision yet for fb_from_target.
        assert!(cache.get_revision(&writer, fb_from_src.id).await.is_none());
        let rekeyed = cache.get_revision(&writer, fb_from_target.id).await;
        assert!(rekeyed.is_some());
        assert_eq!(rekeyed.unwrap().id, revision.id);
    }
}
