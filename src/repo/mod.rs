//! Version-control boundary.
//!
//! The engine talks to the repository only through [`Repository`]. The git
//! CLI implementation lives in [`git`]; [`memory`] holds revisions in memory
//! for tests and dry runs.
//! Apply failures come back as the closed [`ApplyError`] enum so callers
//! switch on the variant instead of searching message text.

pub mod git;
pub mod memory;
pub mod symbols;

pub use git::GitRepository;
pub use memory::MemoryRepository;
pub use symbols::{extract_symbol, SymbolCache, SymbolIndex, SymbolLocation};

use crate::align::most_similar_files;
use std::path::Path;
use thiserror::Error;

/// A version-control command could not run or exited with an error.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unknown revision '{0}'")]
    UnknownRevision(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a hunk did not apply.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("file to patch does not exist: {detail}")]
    MissingFile { detail: String },

    #[error("corrupt patch: {detail}")]
    CorruptFormat { detail: String },

    #[error("context mismatch: {detail}")]
    ContextMismatch { detail: String },

    #[error(transparent)]
    Repository(#[from] RepoError),
}

/// Snapshot access and working-tree control for one repository.
///
/// Implementations own a single working tree. Revisions are opaque strings
/// resolved by the implementation.
pub trait Repository {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    /// Reset the working tree to `rev`, discarding edits and untracked files.
    fn checkout_clean(&self, rev: &str) -> Result<(), RepoError>;

    /// Discard edits and untracked files without moving `HEAD`.
    fn reset_clean(&self) -> Result<(), RepoError>;

    /// Lines of `path` at `rev`, or `None` if the file does not exist there.
    fn read_file(&self, rev: &str, path: &str) -> Result<Option<Vec<String>>, RepoError>;

    /// Lines of `path` in the working tree as it is now.
    fn read_worktree_file(&self, path: &str) -> Result<Option<Vec<String>>, RepoError>;

    /// Apply a patch to the working tree.
    fn apply_patch(&self, patch: &str) -> Result<(), ApplyError>;

    /// Path at `target` of a file that is called `path` at `origin`, if git
    /// sees a rename between the two.
    fn find_renamed_path(
        &self,
        target: &str,
        origin: &str,
        path: &str,
    ) -> Result<Option<String>, RepoError>;

    /// Build a symbol index of the tree at `rev`.
    fn symbol_index(&self, rev: &str) -> Result<SymbolIndex, RepoError>;

    /// Full object id of `rev`.
    fn resolve_ref(&self, rev: &str) -> Result<String, RepoError>;

    fn merge_base(&self, a: &str, b: &str) -> Result<String, RepoError>;

    /// `log --oneline -L start,end:path range`.
    fn line_log(
        &self,
        range: &str,
        path: &str,
        start: usize,
        end: usize,
    ) -> Result<String, RepoError>;

    /// Full `show` output of a commit.
    fn show(&self, rev: &str) -> Result<String, RepoError>;

    /// `show --stat` output of a commit.
    fn show_stat(&self, rev: &str) -> Result<String, RepoError>;

    /// The diff introduced by `commit`, with its log message in front.
    fn commit_patch(&self, commit: &str) -> Result<String, RepoError>;

    /// Working-tree files whose names are closest to `file_name`.
    fn similar_files(&self, file_name: &str) -> Vec<String> {
        most_similar_files(file_name, self.workdir())
    }
}
