//! Forensic helpers for the hunk in progress: where did its code come from?
//!
//! [`History::history`] runs a line-range log over the hunk's old lines
//! between the merge base and the origin revision and remembers the commits
//! it saw. [`History::show`] then digs into the newest of those commits and
//! tries to find where the code lived before it.

use crate::align::align;
use crate::diff::parser::{parse_hunk_header, scan_blocks};
use crate::diff::split_patch;
use crate::repo::Repository;
use crate::session::Session;
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::debug;

const HISTORY_TAIL: usize = 5000;
const STAT_HEAD: usize = 3000;
/// Below this share of added lines the last commit did not introduce the code.
const MOSTLY_ADDED: f64 = 0.6;

#[derive(Debug, Clone, Default)]
struct HunkHistory {
    /// Short ids of the commits that touched the lines, oldest first.
    commits: Vec<String>,
    /// Lines the newest of those commits added.
    last_added: Vec<String>,
    /// Added lines over all lines of that newest change.
    add_ratio: f64,
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = text.char_indices().nth(count - max_chars).map_or(0, |(i, _)| i);
    &text[skip..]
}

fn head(text: &str, max_chars: usize) -> &str {
    let end = text.char_indices().nth(max_chars).map_or(text.len(), |(i, _)| i);
    &text[..end]
}

/// Old-side lines and added lines of a hunk body.
fn split_body(body: &[String]) -> (Vec<String>, Vec<String>) {
    let mut old = Vec::new();
    let mut added = Vec::new();
    for line in body {
        if let Some(text) = line.strip_prefix(' ').or_else(|| line.strip_prefix('-')) {
            old.push(text.to_string());
        } else if let Some(text) = line.strip_prefix('+') {
            added.push(text.to_string());
        }
    }
    (old, added)
}

fn summarize(log: &str) -> Option<HunkHistory> {
    let last = split_patch(log, false).last()?;
    let (_, blocks) = scan_blocks(&last);
    let hunk = blocks.first()?.hunks.first()?;
    let (old, added) = split_body(&hunk.body);
    let total = old.len() + added.len();
    let add_ratio = if total == 0 {
        0.0
    } else {
        added.len() as f64 / total as f64
    };

    let lines: Vec<&str> = log.lines().collect();
    let commits = lines
        .iter()
        .enumerate()
        .filter(|(idx, line)| *idx >= 2 && line.starts_with("diff --git"))
        .filter_map(|(idx, _)| lines[idx - 2].split(' ').next())
        .map(ToString::to_string)
        .collect();

    Some(HunkHistory {
        commits,
        last_added: added,
        add_ratio,
    })
}

/// Per-job cache of line histories, keyed by hunk index.
#[derive(Debug, Default)]
pub struct History {
    by_hunk: HashMap<usize, HunkHistory>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Line-range log of the current hunk's old lines.
    pub fn history<R: Repository + ?Sized>(
        &mut self,
        repo: &R,
        session: &Session,
        target: &str,
        origin: &str,
    ) -> String {
        let Some(current) = session.current_hunk() else {
            return "No hunk is in progress; history is only available while porting a single hunk.\n"
                .to_string();
        };
        let (_, blocks) = scan_blocks(&current.text);
        let located = blocks.first().and_then(|block| {
            let path = block.old_path().as_file()?.to_string();
            let header = parse_hunk_header(&block.hunks.first()?.header).ok()?;
            Some((path, header))
        });
        let Some((path, header)) = located else {
            return "The current hunk has no file header or hunk header to trace.\n".to_string();
        };

        let base = match repo.merge_base(target, origin) {
            Ok(base) => base,
            Err(e) => return format!("Could not find a merge base of {target} and {origin}: {e}\n"),
        };
        let start = header.old_start.max(1);
        let end = (header.old_start + header.old_count).saturating_sub(1).max(start);
        let log = match repo.line_log(&format!("{base}..{origin}"), &path, start, end) {
            Ok(log) => log,
            Err(e) => return format!("Could not read the history of {path}: {e}\n"),
        };

        if !log.is_empty() && !self.by_hunk.contains_key(&current.index) {
            if let Some(summary) = summarize(&log) {
                debug!(
                    hunk = current.index,
                    commits = summary.commits.len(),
                    add_ratio = summary.add_ratio,
                    "recorded line history"
                );
                self.by_hunk.insert(current.index, summary);
            }
        }

        let mut out = tail(&log, HISTORY_TAIL).to_string();
        out.push_str(
            "\nAnalyse the code around the hunk as of the last commit above, step by step.\n\
             If that code already existed before the commit, the hunk context is probably still \
             in a similar place; check with the locate and view tools.\n\
             If that code was added by the commit, use show for more detail.\n",
        );
        out
    }

    /// Where the newest commit from [`History::history`] moved the code from.
    pub fn show<R: Repository + ?Sized>(&self, repo: &R, session: &Session) -> String {
        let summary = session
            .current_hunk()
            .and_then(|current| self.by_hunk.get(&current.index));
        let Some((summary, commit)) = summary.and_then(|s| Some((s, s.commits.last()?))) else {
            return "Nothing to show: run history for the current hunk first, or its history is empty.\n"
                .to_string();
        };

        let (full, stat) = match (repo.show(commit), repo.show_stat(commit)) {
            (Ok(full), Ok(stat)) => (full, stat),
            (Err(e), _) | (_, Err(e)) => return format!("Could not show {commit}: {e}\n"),
        };

        let wanted = summary.last_added.len();
        let mut best: Option<(usize, String, usize, Vec<String>)> = None;
        for unit in split_patch(&full, false) {
            let (_, blocks) = scan_blocks(&unit);
            let Some(block) = blocks.first() else { continue };
            let Some(path) = block.old_path().as_file().map(ToString::to_string) else {
                continue;
            };
            let Some(raw) = block.hunks.first() else { continue };
            let Ok(header) = parse_hunk_header(&raw.header) else { continue };
            if (header.old_count as isize - header.new_count as isize) < wanted as isize {
                continue;
            }
            let (old, _) = split_body(&raw.body);
            let found = align(&summary.last_added, &old, wanted, false);
            if !found.is_found() || best.as_ref().is_some_and(|(d, ..)| found.distance >= *d) {
                continue;
            }
            let start = found.start_index();
            let block_lines = old.get(start..start + wanted).unwrap_or_default().to_vec();
            best = Some((found.distance, path, header.old_start + start, block_lines));
        }

        let mut out = head(&stat, STAT_HEAD).to_string();
        out.push('\n');
        match best {
            _ if summary.add_ratio < MOSTLY_ADDED => out.push_str(
                "[IMPORTANT] The code shown by history is not mostly added lines, so it was not \
                 added or moved by this commit.\n\
                 [IMPORTANT] Check the summary above step by step and ignore it where it is wrong.\n",
            ),
            Some((_, path, line, lines)) if !lines.is_empty() => {
                let _ = writeln!(
                    out,
                    "This commit is large, so here is the part that matters. The hunk's code was \
                     probably in {path} around lines {line} to {} before this commit:",
                    line + wanted
                );
                out.push_str(&lines.join("\n"));
                out.push_str("\nUse the view and locate tools to find the matching code step by step.\n");
            }
            _ => out.push_str(
                "This commit most likely introduced the code, so it has no counterpart in the old \
                 version. Check with the view and locate tools; new code means the hunk need not \
                 be ported.\n",
            ),
        }
        out
    }
}
