//! Mutable state of one backport job.
//!
//! A [`Session`] is created per job and handed by reference to whoever drives
//! the job. Nothing here is global and nothing is persisted.

use std::collections::HashSet;
use xxhash_rust::xxh3::xxh3_64;

/// Which kind of text `validate` currently expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Hunks are landed one by one.
    PerHunk,
    /// All hunks landed; the assembled patch goes through the pipeline.
    WholePatch,
}

/// The hunk the external decision-maker is currently working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentHunk {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct Session {
    pub round_succeeded: bool,
    /// Context mismatches since the current hunk (or the patch phase) began.
    pub mismatch_count: u32,
    pub all_hunks_applied: bool,
    pub compiled: bool,
    pub tested: bool,
    pub poc_validated: bool,
    /// Repaired hunk texts that applied, in order. After the PoC stage passes
    /// this holds only the complete patch.
    pub succeeded_patches: Vec<String>,
    current_hunk: Option<CurrentHunk>,
    submissions: HashSet<u64>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        if self.all_hunks_applied {
            Phase::WholePatch
        } else {
            Phase::PerHunk
        }
    }

    /// Start work on hunk `index`.
    pub fn begin_hunk(&mut self, index: usize, text: impl Into<String>) {
        self.round_succeeded = false;
        self.mismatch_count = 0;
        self.current_hunk = Some(CurrentHunk {
            index,
            text: text.into(),
        });
    }

    pub fn current_hunk(&self) -> Option<&CurrentHunk> {
        self.current_hunk.as_ref()
    }

    /// Switch to whole-patch validation.
    pub fn enter_patch_phase(&mut self) {
        self.all_hunks_applied = true;
        self.current_hunk = None;
        self.mismatch_count = 0;
    }

    pub fn record_success(&mut self, patch: impl Into<String>) {
        self.succeeded_patches.push(patch.into());
        self.round_succeeded = true;
    }

    /// Replace the accumulated hunks with the final patch.
    pub fn finalize(&mut self, patch: impl Into<String>) {
        self.succeeded_patches = vec![patch.into()];
        self.poc_validated = true;
    }

    /// The accumulated hunks joined into one patch.
    pub fn complete_patch(&self) -> String {
        self.succeeded_patches.join("\n")
    }

    /// Remember `text` as submitted. Returns true if the same text was
    /// submitted before.
    pub fn note_submission(&mut self, text: &str) -> bool {
        !self.submissions.insert(xxh3_64(text.trim().as_bytes()))
    }

    pub fn is_finished(&self) -> bool {
        self.poc_validated
    }
}
