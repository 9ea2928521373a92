// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Content-addressing helpers: prompt hashing and judgment pair hashing.

use crate::model::{ArtifactId, JudgmentStage};
use sha2::{Digest, Sha256};

/// Normalize prompt text for hashing: trim trailing whitespace, normalize
/// CRLF to LF. Any other content change must yield a different hash.
pub fn normalize_prompt_text(text: &str) -> String {
    text.replace("\r\n", "\n").trim_end().to_string()
}

/// First 16 hex characters of SHA-256 over the normalized prompt text.
pub fn prompt_hash(prompt_text: &str) -> String {
    hex16(normalize_prompt_text(prompt_text).as_bytes())
}

/// First 16 hex characters of SHA-256 over
/// `<stage>:<min(cidA,cidB)>:<max(cidA,cidB)>`.
pub fn pair_hash(stage: JudgmentStage, cid_a: ArtifactId, cid_b: ArtifactId) -> String {
    let (lo, hi) = if cid_a.0 <= cid_b.0 {
        (cid_a, cid_b)
    } else {
        (cid_b, cid_a)
    };
    let stage_key = match stage {
        JudgmentStage::Initial => "initial",
        JudgmentStage::Revised => "revised",
        JudgmentStage::Improvement => "improvement",
    };
    hex16(format!("{stage_key}:{lo}:{hi}").as_bytes())
}

fn hex16(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}
