//! The text tool surface an external decision-maker drives, and the job
//! driver that runs the first pass over a fix commit.
//!
//! Every call answers with text. The one exception is [`JobAborted`], which
//! means the job has to stop.

use crate::config::JobConfig;
use crate::diff::split_patch;
use crate::history::History;
use crate::hunk::{HunkApplier, HunkOutcome};
use crate::log::{EventKind, SessionLog};
use crate::pipeline::{JobAborted, Pipeline};
use crate::repo::{RepoError, Repository, SymbolCache};
use crate::session::{Phase, Session};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// Submitted instead of a hunk when the hunk has nothing to port.
pub const NEED_NOT_PORTED: &str = "need not ported";

/// The three revisions of a backport job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRefs {
    /// The fix commit.
    pub commit: String,
    /// The revision the fix was written against.
    pub origin: String,
    /// The release the fix is ported to.
    pub target: String,
}

impl JobRefs {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            commit: config.patch.commit.clone(),
            origin: config.patch.parent.clone(),
            target: config.patch.target.clone(),
        }
    }
}

/// One request of the JSON-lines tool protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolRequest {
    ViewFile {
        #[serde(rename = "ref")]
        rev: String,
        path: String,
        start_line: usize,
        end_line: usize,
    },
    LocateSymbol {
        #[serde(rename = "ref")]
        rev: String,
        symbol: String,
    },
    Validate {
        #[serde(rename = "ref")]
        rev: String,
        patch: String,
    },
    History,
    Show,
    BeginHunk {
        index: usize,
    },
    Complete,
}

impl ToolRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::ViewFile { .. } => "view_file",
            ToolRequest::LocateSymbol { .. } => "locate_symbol",
            ToolRequest::Validate { .. } => "validate",
            ToolRequest::History => "history",
            ToolRequest::Show => "show",
            ToolRequest::BeginHunk { .. } => "begin_hunk",
            ToolRequest::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,
    pub text: String,
    /// The PoC stage passed; the job is done.
    pub finished: bool,
}

/// Where a hunk stands after the first pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkStatus {
    Applied,
    /// Needs a revised hunk; `feedback` is the failure text of the direct try.
    Pending { feedback: String },
}

#[derive(Debug, Clone)]
pub struct InitialPass {
    pub statuses: Vec<HunkStatus>,
    /// Pipeline output when every hunk landed directly.
    pub validation: Option<String>,
}

impl InitialPass {
    pub fn pending(&self) -> impl Iterator<Item = (usize, &str)> {
        self.statuses
            .iter()
            .enumerate()
            .filter_map(|(idx, status)| match status {
                HunkStatus::Pending { feedback } => Some((idx, feedback.as_str())),
                HunkStatus::Applied => None,
            })
    }
}

pub struct Backporter<R: Repository> {
    repo: R,
    refs: JobRefs,
    session: Session,
    pipeline: Pipeline,
    history: History,
    symbols: SymbolCache,
    units: Vec<String>,
    log: Option<SessionLog>,
}

impl<R: Repository> Backporter<R> {
    pub fn new(repo: R, refs: JobRefs, pipeline: Pipeline) -> Self {
        Self {
            repo,
            refs,
            session: Session::new(),
            pipeline,
            history: History::new(),
            symbols: SymbolCache::new(),
            units: Vec::new(),
            log: None,
        }
    }

    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn refs(&self) -> &JobRefs {
        &self.refs
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Single-hunk units of the fix commit, filled by the first pass.
    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Resolve every job revision to a commit id.
    pub fn resolve_refs(&mut self) -> Result<(), RepoError> {
        let commit = self.repo.resolve_ref(&self.refs.commit)?;
        let origin = self.repo.resolve_ref(&self.refs.origin)?;
        let target = self.repo.resolve_ref(&self.refs.target)?;
        debug!(%commit, %origin, %target, "resolved job revisions");
        self.refs = JobRefs {
            commit,
            origin,
            target,
        };
        Ok(())
    }

    fn note(&mut self, kind: EventKind, name: &str, text: &str) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.record(kind, name, text) {
                warn!("failed to write session log {}: {e}", log.path().display());
            }
        }
    }

    /// Lines `start..=end` of `path` at `rev`, 1-based. A range running past
    /// the end of the file is shifted back and clamped.
    pub fn view_file(&self, rev: &str, path: &str, start: usize, end: usize) -> String {
        let lines = match self.repo.read_file(rev, path) {
            Ok(Some(lines)) => lines,
            Ok(None) => return "This file doesn't exist in this commit.\n".to_string(),
            Err(e) => {
                debug!("read of {path} at {rev} failed: {e}");
                return "This file doesn't exist in this commit.\n".to_string();
            }
        };

        let total = lines.len();
        let (mut start, mut end) = (start.max(1), end);
        let mut out = if end > total {
            start = start.saturating_sub(end - total).max(1);
            end = total;
            format!("This file only has {total} lines. Here are lines {start} through {end}.\n")
        } else {
            format!("Here are lines {start} through {end}.\n")
        };
        for line in lines.iter().take(end).skip(start - 1) {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(
            "Based on the previous information, think carefully: do you see the target code? \
             Keep checking if you don't.\n",
        );
        out
    }

    /// Where `symbol` is defined at `rev`, or the closest known symbol.
    pub fn locate_symbol(&mut self, rev: &str, symbol: &str) -> String {
        let index = match self.symbols.get_or_build(&self.repo, rev) {
            Ok(index) => index,
            Err(e) => return format!("The symbol index for {rev} could not be built: {e}\n"),
        };
        if let Some(sites) = index.locate(symbol) {
            return sites.iter().map(|site| format!("{site}\n")).collect();
        }
        let Some((similar, sites)) = index.most_similar(symbol) else {
            return format!("The symbol {symbol} does not exist at {rev} and no symbols are indexed.\n");
        };

        let mut out = format!(
            "The symbol {symbol} you are looking for does not exist at {rev}.\n\
             The most similar symbol is `{similar}`, found in:\n"
        );
        for site in sites {
            let _ = writeln!(out, "{site}");
        }
        out.push_str(
            "This is a fuzzy match: check that it means the same thing as the symbol you asked for.\n",
        );
        out
    }

    /// Validate a single hunk while hunks are being landed, or the whole
    /// patch once they all have.
    pub fn validate(&mut self, rev: &str, text: &str) -> Result<String, JobAborted> {
        let mut out = String::new();
        if self.session.note_submission(text) {
            warn!("the same text was submitted again");
            out.push_str(
                "You already submitted exactly this patch. Submitting it again gives the same \
                 result; revise it first.\n",
            );
        }

        match self.session.phase() {
            Phase::PerHunk => {
                if text.contains(NEED_NOT_PORTED) {
                    info!("hunk marked as not needing a port");
                    self.session.round_succeeded = true;
                    out.push_str("Patch applied successfully.\n");
                    return Ok(out);
                }

                let force = self.session.mismatch_count >= 2;
                let origin = self.refs.origin.clone();
                let outcome = HunkApplier::new(&self.repo, &mut self.symbols, &origin)
                    .apply(rev, text, force);
                let _ = write!(out, "{outcome}");
                if outcome.is_context_mismatch() {
                    self.session.mismatch_count += 1;
                    debug!(count = self.session.mismatch_count, "context mismatch");
                }
                if let HunkOutcome::Applied { patch, .. } = outcome {
                    self.session.record_success(patch);
                }
                self.note(EventKind::HunkOutcome, "validate", &out);
            }
            Phase::WholePatch => {
                out.push_str(&self.pipeline.validate(&self.repo, &mut self.session, rev, text)?);
                self.note(EventKind::StageOutcome, "validate", &out);
            }
        }
        Ok(out)
    }

    pub fn history(&mut self) -> String {
        self.history
            .history(&self.repo, &self.session, &self.refs.target, &self.refs.origin)
    }

    pub fn show(&self) -> String {
        self.history.show(&self.repo, &self.session)
    }

    /// Make unit `index` of the fix commit the hunk in progress.
    pub fn begin_hunk(&mut self, index: usize) -> Option<&str> {
        let text = self.units.get(index)?.clone();
        self.session.begin_hunk(index, text);
        self.units.get(index).map(String::as_str)
    }

    /// Switch to whole-patch validation and validate the accumulated hunks.
    pub fn complete(&mut self) -> Result<String, JobAborted> {
        self.session.enter_patch_phase();
        let patch = self.session.complete_patch();
        let target = self.refs.target.clone();
        let out = self
            .pipeline
            .validate(&self.repo, &mut self.session, &target, &patch)?;
        self.note(EventKind::StageOutcome, "complete", &out);
        Ok(out)
    }

    /// Try every hunk of the fix commit directly against the target.
    pub fn run_initial_pass(&mut self) -> Result<InitialPass, JobAborted> {
        let patch = match self.repo.commit_patch(&self.refs.commit) {
            Ok(patch) => patch,
            Err(e) => {
                warn!("could not read commit {}: {e}", self.refs.commit);
                return Ok(InitialPass {
                    statuses: Vec::new(),
                    validation: None,
                });
            }
        };
        self.units = split_patch(&patch, true).collect();
        info!("fix commit has {} hunk(s)", self.units.len());

        let target = self.refs.target.clone();
        let origin = self.refs.origin.clone();
        let mut statuses = Vec::with_capacity(self.units.len());
        for (idx, unit) in self.units.iter().enumerate() {
            self.session.begin_hunk(idx, unit.clone());
            let outcome = HunkApplier::new(&self.repo, &mut self.symbols, &origin)
                .apply(&target, unit, false);
            match outcome {
                HunkOutcome::Applied { patch, relocation } => {
                    if let Some(relocation) = relocation {
                        info!("hunk {idx}: {} moved to {}", relocation.from, relocation.to);
                    }
                    info!("hunk {idx} applied directly");
                    self.session.record_success(patch);
                    statuses.push(HunkStatus::Applied);
                }
                failed => {
                    info!("hunk {idx} needs revision");
                    statuses.push(HunkStatus::Pending {
                        feedback: failed.to_string(),
                    });
                }
            }
        }

        let summary = format!(
            "{} of {} hunk(s) applied directly",
            statuses.iter().filter(|s| **s == HunkStatus::Applied).count(),
            statuses.len()
        );
        self.note(EventKind::HunkOutcome, "initial_pass", &summary);

        let all_applied = statuses.iter().all(|s| *s == HunkStatus::Applied);
        let validation = if !statuses.is_empty() && all_applied {
            Some(self.complete()?)
        } else {
            None
        };
        Ok(InitialPass {
            statuses,
            validation,
        })
    }

    /// Dispatch one tool request.
    pub fn call(&mut self, request: ToolRequest) -> Result<String, JobAborted> {
        let name = request.name();
        debug!(tool = name, "tool call");
        let request_text = serde_json::to_string(&request).unwrap_or_default();
        self.note(EventKind::ToolCall, name, &request_text);

        let text = match request {
            ToolRequest::ViewFile {
                rev,
                path,
                start_line,
                end_line,
            } => self.view_file(&rev, &path, start_line, end_line),
            ToolRequest::LocateSymbol { rev, symbol } => self.locate_symbol(&rev, &symbol),
            ToolRequest::Validate { rev, patch } => self.validate(&rev, &patch)?,
            ToolRequest::History => self.history(),
            ToolRequest::Show => self.show(),
            ToolRequest::BeginHunk { index } => {
                let total = self.units.len();
                match self.begin_hunk(index) {
                    Some(unit) => format!("Now porting hunk {index}:\n{unit}"),
                    None => format!("There is no hunk {index}; the fix has {total} hunk(s).\n"),
                }
            }
            ToolRequest::Complete => self.complete()?,
        };
        Ok(text)
    }

    /// Like [`Backporter::call`], but never fails: an aborted job becomes a
    /// response with `ok == false`.
    pub fn respond(&mut self, request: ToolRequest) -> ToolResponse {
        match self.call(request) {
            Ok(text) => ToolResponse {
                ok: true,
                text,
                finished: self.session.is_finished(),
            },
            Err(aborted) => {
                let text = aborted.to_string();
                self.note(EventKind::JobResult, "aborted", &text);
                ToolResponse {
                    ok: false,
                    text,
                    finished: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;

    const FILE: &str = "one\ntwo\nthree\nfour\nfive\n";

    fn backporter(repo: MemoryRepository) -> Backporter<MemoryRepository> {
        let refs = JobRefs {
            commit: "fix".to_string(),
            origin: "v2".to_string(),
            target: "v1".to_string(),
        };
        Backporter::new(repo, refs, Pipeline::default())
    }

    #[test]
    fn test_view_file_range() {
        let bp = backporter(MemoryRepository::new().with_file("v1", "a.txt", FILE));
        let out = bp.view_file("v1", "a.txt", 2, 3);
        assert!(out.starts_with("Here are lines 2 through 3.\ntwo\nthree\n"));
    }

    #[test]
    fn test_view_file_clamps_past_end() {
        let bp = backporter(MemoryRepository::new().with_file("v1", "a.txt", FILE));
        let out = bp.view_file("v1", "a.txt", 4, 7);
        assert!(out.starts_with(
            "This file only has 5 lines. Here are lines 2 through 5.\ntwo\nthree\nfour\nfive\n"
        ));
    }

    #[test]
    fn test_view_missing_file() {
        let bp = backporter(MemoryRepository::new().with_file("v1", "a.txt", FILE));
        assert_eq!(
            bp.view_file("v1", "b.txt", 1, 2),
            "This file doesn't exist in this commit.\n"
        );
    }

    #[test]
    fn test_locate_symbol_exact_and_fuzzy() {
        let repo = MemoryRepository::new()
            .with_ctags(
                "v1",
                "smb2_open\tfs/smb2pdu.c\t120;\"\tf\nsmb2_close\tfs/smb2pdu.c\t300;\"\tf\n",
            );
        let mut bp = backporter(repo);
        assert_eq!(bp.locate_symbol("v1", "smb2_open"), "fs/smb2pdu.c:120\n");

        let fuzzy = bp.locate_symbol("v1", "smb2_opn");
        assert!(fuzzy.contains("`smb2_open`"));
        assert!(fuzzy.contains("fs/smb2pdu.c:120"));
        assert!(fuzzy.contains("fuzzy match"));
    }

    #[test]
    fn test_need_not_ported_short_circuits() {
        let mut bp = backporter(MemoryRepository::new());
        let out = bp.validate("v1", NEED_NOT_PORTED).unwrap();
        assert_eq!(out, "Patch applied successfully.\n");
        assert!(bp.session().round_succeeded);
        assert!(bp.repo().applied().is_empty());
    }

    #[test]
    fn test_repeated_submission_is_flagged() {
        let mut bp = backporter(MemoryRepository::new());
        let first = bp.validate("v1", NEED_NOT_PORTED).unwrap();
        let second = bp.validate("v1", NEED_NOT_PORTED).unwrap();
        assert!(!first.contains("already submitted"));
        assert!(second.contains("already submitted"));
    }

    #[test]
    fn test_tool_request_wire_format() {
        let request: ToolRequest =
            serde_json::from_str(r#"{"tool":"validate","ref":"v1","patch":"need not ported"}"#)
                .unwrap();
        assert_eq!(
            request,
            ToolRequest::Validate {
                rev: "v1".to_string(),
                patch: "need not ported".to_string()
            }
        );
        let history: ToolRequest = serde_json::from_str(r#"{"tool":"history"}"#).unwrap();
        assert_eq!(history, ToolRequest::History);
    }
}
