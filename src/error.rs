// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for the writing-bench engine.
//!
//! Each module with fallible operations owns a `thiserror`-derived error
//! enum, following the pattern used throughout the reference stack
//! (`ProviderError`, `RankingError`, `FleetRunnerError`): one variant per
//! failure mode, human-readable messages, `#[from]` conversions so errors
//! compose cleanly up the call stack.

use thiserror::Error;

/// Errors from the content-addressed cache (§4.1).
#[derive(Error, Debug)]
pub enum CacheError {
    /// Failed to create a directory in the cache tree.
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write an artifact file (temp-write or rename step).
    #[error("failed to write cache file {path}: {source}")]
    Write {
        /// File that could not be written.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize an artifact for persistence.
    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Failed to enumerate entries in a cache directory (not a missing-file
    /// case; those are treated as an empty result per §7).
    #[error("failed to list cache directory {path}: {source}")]
    ListDir {
        /// Directory that could not be listed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to remove a cache file during trim/combine.
    #[error("failed to remove cache file {path}: {source}")]
    Remove {
        /// File that could not be removed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to copy a cache file during combine.
    #[error("failed to copy cache file {from} -> {to}: {source}")]
    Copy {
        /// Source file.
        from: String,
        /// Destination file.
        to: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from WHR inference (§4.2).
#[derive(Error, Debug)]
pub enum WhrError {
    /// Newton's method failed to converge within the iteration cap.
    #[error("WHR solver did not converge after {iters} iterations (max |delta r| = {max_delta})")]
    DidNotConverge {
        /// Iterations attempted.
        iters: u32,
        /// Largest remaining update, for diagnostics.
        max_delta: f64,
    },

    /// The expected-information matrix was singular and could not be
    /// inverted to recover posterior variances.
    #[error("expected-information matrix is singular, cannot compute confidence intervals")]
    SingularInformationMatrix,
}

/// Errors from need identification (§4.3).
#[derive(Error, Debug)]
pub enum NeedError {
    /// Ranking/convergence parameters were invalid (e.g. negative threshold).
    #[error("invalid convergence configuration: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced by the ensure-cascade (§4.4).
#[derive(Error, Debug)]
pub enum CascadeError {
    /// The underlying cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The external generator failed to produce the artifact. This is a
    /// recorded, non-fatal condition: see `MissingArtifacts` (§4.3/§7).
    #[error("generator call failed for {artifact}: {message}")]
    GeneratorFailed {
        /// Human-readable description of the artifact that could not be
        /// produced (e.g. "sample(gpt-4, prompt-1, 0)").
        artifact: String,
        /// Error message from the generator.
        message: String,
    },

    /// The generator reported `finish_reason = "length"`; treated as a
    /// truncation error per §6.
    #[error("generator truncated output for {artifact}")]
    Truncated {
        /// Human-readable description of the artifact.
        artifact: String,
    },
}

/// Errors from the top-level adaptive loop (§4.5).
#[derive(Error, Debug)]
pub enum AdaptiveLoopError {
    /// The run configuration failed validation before the loop started.
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    /// A needs-identification failure (should be rare; only on configuration
    /// errors, since `identifyNeeds` itself never fails on valid input).
    #[error(transparent)]
    Need(#[from] NeedError),
}
