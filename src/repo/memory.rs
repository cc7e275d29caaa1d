//! In-memory [`Repository`] for tests and dry runs.
//!
//! Revisions are named file maps. `apply_patch` applies hunks by exact
//! context search, all-or-nothing per patch like `git apply`.

use super::symbols::SymbolIndex;
use super::{ApplyError, RepoError, Repository};
use crate::align::SIMILAR_FILES;
use crate::diff::parse_patch;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use strsim::levenshtein;

type Tree = BTreeMap<String, Vec<String>>;

#[derive(Debug, Default)]
struct Worktree {
    head: Option<String>,
    files: Tree,
}

#[derive(Debug)]
pub struct MemoryRepository {
    workdir: PathBuf,
    revs: HashMap<String, Tree>,
    renames: HashMap<String, String>,
    ctags: HashMap<String, String>,
    line_logs: HashMap<String, String>,
    shows: HashMap<String, String>,
    stats: HashMap<String, String>,
    commits: HashMap<String, String>,
    worktree: RefCell<Worktree>,
    applied: RefCell<Vec<String>>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            revs: HashMap::new(),
            renames: HashMap::new(),
            ctags: HashMap::new(),
            line_logs: HashMap::new(),
            shows: HashMap::new(),
            stats: HashMap::new(),
            commits: HashMap::new(),
            worktree: RefCell::new(Worktree::default()),
            applied: RefCell::new(Vec::new()),
        }
    }
}

fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(ToString::to_string).collect()
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = dir.into();
        self
    }

    pub fn with_file(mut self, rev: &str, path: &str, content: &str) -> Self {
        self.revs
            .entry(rev.to_string())
            .or_default()
            .insert(path.to_string(), split_lines(content));
        self
    }

    /// Record that the file called `origin_path` upstream is `target_path`
    /// at the target revision.
    pub fn with_rename(mut self, origin_path: &str, target_path: &str) -> Self {
        self.renames
            .insert(origin_path.to_string(), target_path.to_string());
        self
    }

    pub fn with_ctags(mut self, rev: &str, output: &str) -> Self {
        self.ctags.insert(rev.to_string(), output.to_string());
        self
    }

    pub fn with_line_log(mut self, path: &str, output: &str) -> Self {
        self.line_logs.insert(path.to_string(), output.to_string());
        self
    }

    pub fn with_show(mut self, rev: &str, output: &str, stat: &str) -> Self {
        self.shows.insert(rev.to_string(), output.to_string());
        self.stats.insert(rev.to_string(), stat.to_string());
        self
    }

    pub fn with_commit(mut self, commit: &str, patch: &str) -> Self {
        self.commits.insert(commit.to_string(), patch.to_string());
        self
    }

    /// Every patch that applied, in order.
    pub fn applied(&self) -> Vec<String> {
        self.applied.borrow().clone()
    }

    fn apply_to(files: &mut Tree, patch: &str) -> Result<(), ApplyError> {
        let blocks = parse_patch(patch).map_err(|e| ApplyError::CorruptFormat {
            detail: format!("error: corrupt patch: {e}"),
        })?;
        for block in blocks {
            if block.is_creation() {
                let Some(path) = block.new_path.as_file() else {
                    continue;
                };
                let content = block.hunks.iter().flat_map(|h| h.new_lines()).map(String::from);
                files.insert(path.to_string(), content.collect());
                continue;
            }
            let Some(path) = block.old_path.as_file() else {
                continue;
            };
            let Some(lines) = files.get_mut(path) else {
                return Err(ApplyError::MissingFile {
                    detail: format!("error: {path}: No such file or directory"),
                });
            };
            for hunk in &block.hunks {
                let old = hunk.old_lines();
                let pos = if old.is_empty() {
                    Some(hunk.header.old_start.min(lines.len()))
                } else {
                    let hint = hunk.header.old_start.saturating_sub(1);
                    let matches_at = |i: usize| {
                        i + old.len() <= lines.len()
                            && lines[i..i + old.len()]
                                .iter()
                                .zip(&old)
                                .all(|(a, b)| a.as_str() == *b)
                    };
                    (hint..lines.len())
                        .chain(0..hint.min(lines.len()))
                        .find(|&i| matches_at(i))
                };
                let Some(pos) = pos else {
                    return Err(ApplyError::ContextMismatch {
                        detail: format!("error: patch failed: {path}:{}", hunk.header.old_start),
                    });
                };
                let replacement: Vec<String> =
                    hunk.new_lines().into_iter().map(String::from).collect();
                lines.splice(pos..pos + old.len(), replacement);
            }
        }
        Ok(())
    }
}

impl Repository for MemoryRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn checkout_clean(&self, rev: &str) -> Result<(), RepoError> {
        let tree = self
            .revs
            .get(rev)
            .ok_or_else(|| RepoError::UnknownRevision(rev.to_string()))?;
        let mut worktree = self.worktree.borrow_mut();
        worktree.head = Some(rev.to_string());
        worktree.files = tree.clone();
        Ok(())
    }

    fn reset_clean(&self) -> Result<(), RepoError> {
        let mut worktree = self.worktree.borrow_mut();
        let files = worktree
            .head
            .as_ref()
            .and_then(|head| self.revs.get(head))
            .cloned()
            .unwrap_or_default();
        worktree.files = files;
        Ok(())
    }

    fn read_file(&self, rev: &str, path: &str) -> Result<Option<Vec<String>>, RepoError> {
        Ok(self.revs.get(rev).and_then(|tree| tree.get(path)).cloned())
    }

    fn read_worktree_file(&self, path: &str) -> Result<Option<Vec<String>>, RepoError> {
        Ok(self.worktree.borrow().files.get(path).cloned())
    }

    fn apply_patch(&self, patch: &str) -> Result<(), ApplyError> {
        let mut files = self.worktree.borrow().files.clone();
        Self::apply_to(&mut files, patch)?;
        self.worktree.borrow_mut().files = files;
        self.applied.borrow_mut().push(patch.to_string());
        Ok(())
    }

    fn find_renamed_path(
        &self,
        _target: &str,
        _origin: &str,
        path: &str,
    ) -> Result<Option<String>, RepoError> {
        Ok(self.renames.get(path).cloned())
    }

    fn symbol_index(&self, rev: &str) -> Result<SymbolIndex, RepoError> {
        if let Some(ctags) = self.ctags.get(rev) {
            return Ok(SymbolIndex::from_ctags(ctags));
        }
        self.checkout_clean(rev)?;
        Ok(SymbolIndex::default())
    }

    fn resolve_ref(&self, rev: &str) -> Result<String, RepoError> {
        if self.revs.contains_key(rev) || self.commits.contains_key(rev) {
            Ok(rev.to_string())
        } else {
            Err(RepoError::UnknownRevision(rev.to_string()))
        }
    }

    fn merge_base(&self, a: &str, _b: &str) -> Result<String, RepoError> {
        Ok(a.to_string())
    }

    fn line_log(
        &self,
        _range: &str,
        path: &str,
        _start: usize,
        _end: usize,
    ) -> Result<String, RepoError> {
        Ok(self.line_logs.get(path).cloned().unwrap_or_default())
    }

    fn show(&self, rev: &str) -> Result<String, RepoError> {
        self.shows.get(rev).cloned().ok_or_else(|| RepoError::UnknownRevision(rev.to_string()))
    }

    fn show_stat(&self, rev: &str) -> Result<String, RepoError> {
        self.stats.get(rev).cloned().ok_or_else(|| RepoError::UnknownRevision(rev.to_string()))
    }

    fn commit_patch(&self, commit: &str) -> Result<String, RepoError> {
        self.commits
            .get(commit)
            .cloned()
            .ok_or_else(|| RepoError::UnknownRevision(commit.to_string()))
    }

    fn similar_files(&self, file_name: &str) -> Vec<String> {
        let paths: BTreeSet<&String> = self.revs.values().flat_map(|tree| tree.keys()).collect();
        let mut scored: Vec<(usize, &String)> = paths
            .into_iter()
            .map(|path| {
                let name = path.rsplit('/').next().unwrap_or(path);
                (levenshtein(file_name, name), path)
            })
            .collect();
        scored.sort_by_key(|(distance, _)| *distance);
        scored
            .into_iter()
            .take(SIMILAR_FILES)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> MemoryRepository {
        MemoryRepository::new().with_file("v1", "a.c", "one\ntwo\nthree\nfour\n")
    }

    #[test]
    fn test_apply_and_reset() {
        let repo = repo();
        repo.checkout_clean("v1").unwrap();
        repo.apply_patch("--- a/a.c\n+++ b/a.c\n@@ -2,2 +2,2 @@\n two\n-three\n+THREE\n")
            .unwrap();
        assert_eq!(
            repo.read_worktree_file("a.c").unwrap().unwrap(),
            vec!["one", "two", "THREE", "four"]
        );
        repo.reset_clean().unwrap();
        assert_eq!(repo.read_worktree_file("a.c").unwrap().unwrap()[2], "three");
    }

    #[test]
    fn test_apply_classifies_failures() {
        let repo = repo();
        repo.checkout_clean("v1").unwrap();
        assert!(matches!(
            repo.apply_patch("--- a/b.c\n+++ b/b.c\n@@ -1,1 +1,1 @@\n-x\n+y\n"),
            Err(ApplyError::MissingFile { .. })
        ));
        assert!(matches!(
            repo.apply_patch("--- a/a.c\n+++ b/a.c\n@@ -1,1 +1,1 @@\n-zero\n+y\n"),
            Err(ApplyError::ContextMismatch { .. })
        ));
        assert!(matches!(
            repo.apply_patch("--- a/a.c\n+++ b/a.c\n@@ -1,1 +1,1 @@\n one\nbroken\n"),
            Err(ApplyError::CorruptFormat { .. })
        ));
        assert!(repo.applied().is_empty());
    }

    #[test]
    fn test_seeded_symbols_need_no_tree() {
        let repo = MemoryRepository::new().with_ctags("v2", "open_file\tsrc/io.c\t12;\"\tf\n");
        let index = repo.symbol_index("v2").unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.locate("open_file").is_some());

        assert!(repo.symbol_index("v1").is_err());
        let with_tree = repo.with_file("v1", "a.c", "int a;\n");
        assert!(with_tree.symbol_index("v1").unwrap().is_empty());
    }
}
