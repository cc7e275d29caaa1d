//! Landing one hunk on one revision.
//!
//! Every attempt runs checkout, repair, apply against a clean tree and leaves
//! the tree clean again. A missing file triggers the relocation cascade:
//! rename detection, then the symbol index, then file-name similarity.

use crate::diagnostic::{context_mismatch, MismatchReport};
use crate::diff::parser::scan_blocks;
use crate::repair::repair;
use crate::repo::{extract_symbol, ApplyError, Repository, SymbolCache};
use std::fmt;
use tracing::{debug, info, warn};

/// A file that turned out to live somewhere else at the target revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkFailure {
    /// The file is gone and no candidate location accepted the hunk.
    MissingFile {
        path: String,
        candidates: Vec<String>,
        /// Why each candidate was rejected.
        attempts: Vec<String>,
    },
    CorruptFormat { detail: String },
    /// `report` is `None` when the hunk could not be analysed at all.
    ContextMismatch { report: Option<MismatchReport> },
    Repository { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "HunkOutcome reports whether the hunk landed"]
pub enum HunkOutcome {
    Applied {
        /// The repaired text that applied.
        patch: String,
        relocation: Option<Relocation>,
    },
    Failed(HunkFailure),
}

impl HunkOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, HunkOutcome::Applied { .. })
    }

    pub fn is_context_mismatch(&self) -> bool {
        matches!(self, HunkOutcome::Failed(HunkFailure::ContextMismatch { .. }))
    }

    pub fn mismatch_report(&self) -> Option<&MismatchReport> {
        match self {
            HunkOutcome::Failed(HunkFailure::ContextMismatch { report }) => report.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for HunkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HunkOutcome::Applied { relocation, .. } => {
                writeln!(f, "Patch applied successfully.")?;
                if let Some(Relocation { from, to }) = relocation {
                    writeln!(
                        f,
                        "{from} has been moved to {to}. Use --- a/{to} in your patch from now on."
                    )?;
                }
                Ok(())
            }
            HunkOutcome::Failed(failure) => write!(f, "{failure}"),
        }
    }
}

impl fmt::Display for HunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HunkFailure::MissingFile {
                path,
                candidates,
                attempts,
            } => {
                writeln!(
                    f,
                    "{path} does not exist at the target revision and the hunk did not apply to any likely new location."
                )?;
                writeln!(f, "Possible file paths: {candidates:?}")?;
                for attempt in attempts {
                    writeln!(f, "{attempt}")?;
                }
                Ok(())
            }
            HunkFailure::CorruptFormat { detail } => writeln!(
                f,
                "The patch is not well-formed unified diff ({detail}). Check the tool call \
                 arguments, the hunk header and that every body line starts with ' ', '+' or '-'."
            ),
            HunkFailure::ContextMismatch { report } => {
                writeln!(
                    f,
                    "This patch does not apply because of a CONTEXT MISMATCH. Context lines are \
                     the lines starting with ' ' or '-'; they must match the old version exactly."
                )?;
                if let Some(report) = report {
                    write!(f, "{}", report.snippet())?;
                    writeln!(f, "Here is how your context differs from the old version.")?;
                    write!(f, "{}", report.comparison())?;
                }
                Ok(())
            }
            HunkFailure::Repository { detail } => {
                writeln!(f, "The repository could not be prepared for this attempt: {detail}")
            }
        }
    }
}

/// Rewrite the `---`/`+++` header lines of `unit` from `from` to `to`.
/// Hunk bodies are left alone.
pub fn substitute_path(unit: &str, from: &str, to: &str) -> String {
    let old_header = format!("--- a/{from}");
    let new_header = format!("+++ b/{from}");
    let mut out: Vec<String> = unit
        .lines()
        .map(|line| {
            if line == old_header {
                format!("--- a/{to}")
            } else if line == new_header {
                format!("+++ b/{to}")
            } else {
                line.to_string()
            }
        })
        .collect();
    out.push(String::new());
    out.join("\n")
}

/// Applies single-hunk units against a revision of one repository.
pub struct HunkApplier<'a, R: Repository + ?Sized> {
    repo: &'a R,
    symbols: &'a mut SymbolCache,
    /// The revision the patch was written against.
    origin: &'a str,
}

impl<'a, R: Repository + ?Sized> HunkApplier<'a, R> {
    pub fn new(repo: &'a R, symbols: &'a mut SymbolCache, origin: &'a str) -> Self {
        Self {
            repo,
            symbols,
            origin,
        }
    }

    /// Try to land `unit` on `rev`.
    pub fn apply(&mut self, rev: &str, unit: &str, force: bool) -> HunkOutcome {
        let outcome = match self.attempt(rev, unit, force) {
            Ok(patch) => HunkOutcome::Applied {
                patch,
                relocation: None,
            },
            Err((repaired, ApplyError::MissingFile { detail })) => {
                debug!("file not found: {detail}");
                self.relocate(rev, &repaired, force)
            }
            Err((_, ApplyError::CorruptFormat { detail })) => {
                HunkOutcome::Failed(HunkFailure::CorruptFormat { detail })
            }
            Err((repaired, ApplyError::ContextMismatch { detail })) => {
                debug!("context mismatch: {detail}");
                HunkOutcome::Failed(HunkFailure::ContextMismatch {
                    report: context_mismatch(self.repo, rev, &repaired),
                })
            }
            Err((_, ApplyError::Repository(e))) => HunkOutcome::Failed(HunkFailure::Repository {
                detail: e.to_string(),
            }),
        };
        if let Err(e) = self.repo.reset_clean() {
            warn!("failed to reset working tree: {e}");
        }
        outcome
    }

    /// One checkout, repair, apply cycle. On failure the repaired text is
    /// returned with the error so it can be diagnosed.
    fn attempt(&self, rev: &str, unit: &str, force: bool) -> Result<String, (String, ApplyError)> {
        self.repo
            .checkout_clean(rev)
            .map_err(|e| (unit.to_string(), ApplyError::Repository(e)))?;
        let repaired = repair(unit, |path| self.repo.read_file(rev, path).ok().flatten(), force);
        debug!(modified = repaired.modified, "repaired hunk:\n{}", repaired.text);
        match self.repo.apply_patch(&repaired.text) {
            Ok(()) => Ok(repaired.text),
            Err(e) => Err((repaired.text, e)),
        }
    }

    /// Candidate new locations for `path`, best source first.
    fn candidates(&mut self, rev: &str, unit: &str, path: &str) -> Vec<String> {
        match self.repo.find_renamed_path(rev, self.origin, path) {
            Ok(Some(renamed)) => {
                debug!("{path} was renamed to {renamed}");
                return vec![renamed];
            }
            Ok(None) => {}
            Err(e) => debug!("rename detection failed: {e}"),
        }

        let header = unit.lines().find(|line| line.starts_with("@@"));
        if let Some(symbol) = header.and_then(extract_symbol) {
            match self.symbols.get_or_build(self.repo, rev) {
                Ok(index) => {
                    if let Some(sites) = index.locate(symbol) {
                        debug!("found {symbol} in {} place(s)", sites.len());
                        let mut paths: Vec<String> = Vec::new();
                        for site in sites {
                            if !paths.contains(&site.path) {
                                paths.push(site.path.clone());
                            }
                        }
                        return paths;
                    }
                    debug!("no {path} and no symbol {symbol} at {rev}");
                }
                Err(e) => debug!("symbol index unavailable: {e}"),
            }
        }

        let file_name = path.rsplit('/').next().unwrap_or(path);
        self.repo.similar_files(file_name)
    }

    fn relocate(&mut self, rev: &str, unit: &str, force: bool) -> HunkOutcome {
        let (_, blocks) = scan_blocks(unit);
        let Some(path) = blocks
            .first()
            .and_then(|block| block.old_path().as_file().map(ToString::to_string))
        else {
            return HunkOutcome::Failed(HunkFailure::MissingFile {
                path: String::new(),
                candidates: Vec::new(),
                attempts: Vec::new(),
            });
        };

        let candidates = self.candidates(rev, unit, &path);
        let mut attempts = Vec::new();
        for candidate in candidates.iter().filter(|c| **c != path) {
            debug!("trying {candidate} for {path}");
            let moved = substitute_path(unit, &path, candidate);
            match self.attempt(rev, &moved, force) {
                Ok(patch) => {
                    info!("{path} has been moved to {candidate}");
                    return HunkOutcome::Applied {
                        patch,
                        relocation: Some(Relocation {
                            from: path,
                            to: candidate.clone(),
                        }),
                    };
                }
                Err((_, e)) => attempts.push(format!("{candidate}: {e}")),
            }
        }

        debug!("hunk did not apply to any of {candidates:?}");
        HunkOutcome::Failed(HunkFailure::MissingFile {
            path,
            candidates,
            attempts,
        })
    }
}
