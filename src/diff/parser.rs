//! Unified-diff scanning, parsing and per-hunk splitting.
//!
//! Two levels are offered. [`scan_blocks`] is lenient: it keeps hunk bodies
//! as raw text so the repair engine can fix malformed lines itself.
//! [`parse_patch`] is strict and yields the typed model from
//! [`crate::diff::model`]. [`split_patch`] lazily cuts a patch into
//! independently appliable single-hunk units.

use crate::diff::errors::ParseError;
use crate::diff::model::{DiffPath, FileBlock, Hunk, HunkHeader, Line, LineTag};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// File names and suffixes that never matter for a code backport.
pub const DENYLIST: &[&str] = &[
    ".rst", ".yaml", ".yml", ".md", ".tcl", "CHANGES", "ANNOUNCE", "NEWS", ".pem", ".js", ".sha1",
    ".sha256", ".uuid", ".test", "manifest", ".xml", "_test.go", ".json", ".golden", ".txt",
    ".mdx",
];

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$").expect("valid regex")
});

/// True if `path` ends with one of the [`DENYLIST`] entries.
pub fn is_denylisted(path: &str) -> bool {
    DENYLIST.iter().any(|suffix| path.ends_with(suffix))
}

/// Parse an `@@ -a,b +c,d @@trailer` line. Omitted counts default to 1.
pub fn parse_hunk_header(line: &str) -> Result<HunkHeader, ParseError> {
    let caps = HUNK_HEADER
        .captures(line.trim_end_matches('\r'))
        .ok_or_else(|| ParseError::InvalidHunkHeader {
            line: line.to_string(),
        })?;
    let num = |idx: usize| -> Result<usize, ParseError> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().map_err(|_| ParseError::InvalidHunkHeader {
                line: line.to_string(),
            }),
            None => Ok(1),
        }
    };
    Ok(HunkHeader {
        old_start: num(1)?,
        old_count: num(2)?,
        new_start: num(3)?,
        new_count: num(4)?,
        trailer: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
    })
}

/// `--- a/...` or `--- /dev/null` immediately followed by a `+++ ` line.
fn is_file_marker(lines: &[&str], idx: usize) -> bool {
    let Some(line) = lines.get(idx) else {
        return false;
    };
    (line.starts_with("--- a/") || line.starts_with("--- /dev/null"))
        && lines
            .get(idx + 1)
            .is_some_and(|next| next.starts_with("+++ "))
}

fn ends_hunk_body(lines: &[&str], idx: usize) -> bool {
    let line = lines[idx];
    line.starts_with("@@") || line.starts_with("diff --git ") || is_file_marker(lines, idx)
}

/// Effective path of a header pair: the old path, or the new one for creations.
fn header_path(old_line: &str, new_line: &str) -> Option<String> {
    let old = DiffPath::parse(old_line.trim_start_matches("--- "), "a/");
    let new = DiffPath::parse(new_line.trim_start_matches("+++ "), "b/");
    old.as_file()
        .or_else(|| new.as_file())
        .map(ToString::to_string)
}

/// Index of the first line that belongs to the diff proper.
fn preamble_end(lines: &[&str]) -> usize {
    (0..lines.len())
        .find(|&i| lines[i].starts_with("diff --git ") || is_file_marker(lines, i))
        .unwrap_or(lines.len())
}

/// One hunk with its body kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHunk {
    pub header: String,
    pub body: Vec<String>,
}

impl RawHunk {
    /// Strict conversion: every body line must carry a diff prefix.
    /// `\ No newline at end of file` markers flag the line before them.
    pub fn to_hunk(&self) -> Result<Hunk, ParseError> {
        let header = parse_hunk_header(&self.header)?;
        let mut lines: Vec<Line> = Vec::with_capacity(self.body.len());
        for (idx, raw) in self.body.iter().enumerate() {
            if raw.starts_with('\\') {
                if let Some(last) = lines.last_mut() {
                    last.no_newline = true;
                }
                continue;
            }
            let mut chars = raw.chars();
            let tag = chars
                .next()
                .and_then(LineTag::from_prefix)
                .ok_or_else(|| ParseError::MalformedLine {
                    line_no: idx + 1,
                    line: raw.clone(),
                })?;
            lines.push(Line::new(tag, chars.as_str()));
        }
        Ok(Hunk { header, lines })
    }
}

/// One `--- / +++` header pair and its raw hunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub old_header: String,
    pub new_header: String,
    pub hunks: Vec<RawHunk>,
}

impl RawBlock {
    pub fn old_path(&self) -> DiffPath {
        DiffPath::parse(self.old_header.trim_start_matches("--- "), "a/")
    }

    pub fn new_path(&self) -> DiffPath {
        DiffPath::parse(self.new_header.trim_start_matches("+++ "), "b/")
    }
}

/// Lenient scan of a patch into its preamble and raw file blocks.
pub fn scan_blocks(patch: &str) -> (String, Vec<RawBlock>) {
    let lines: Vec<&str> = patch.lines().collect();
    let start = preamble_end(&lines);
    let preamble = lines[..start].join("\n");

    let mut blocks: Vec<RawBlock> = Vec::new();
    let mut idx = start;
    while idx < lines.len() {
        if is_file_marker(&lines, idx) {
            blocks.push(RawBlock {
                old_header: lines[idx].to_string(),
                new_header: lines[idx + 1].to_string(),
                hunks: Vec::new(),
            });
            idx += 2;
            continue;
        }
        if lines[idx].starts_with("@@") {
            let header = lines[idx].to_string();
            idx += 1;
            let body_start = idx;
            while idx < lines.len() && !ends_hunk_body(&lines, idx) {
                idx += 1;
            }
            match blocks.last_mut() {
                Some(block) => block.hunks.push(RawHunk {
                    header,
                    body: lines[body_start..idx].iter().map(|s| s.to_string()).collect(),
                }),
                None => debug!("hunk header without file header skipped: {header}"),
            }
            continue;
        }
        idx += 1;
    }
    (preamble, blocks)
}

/// Strict parse of a whole patch into typed file blocks.
pub fn parse_patch(patch: &str) -> Result<Vec<FileBlock>, ParseError> {
    let (_, raw_blocks) = scan_blocks(patch);
    if raw_blocks.is_empty() {
        return Err(ParseError::NoFileHeader);
    }
    raw_blocks
        .iter()
        .map(|raw| {
            Ok(FileBlock {
                old_path: raw.old_path(),
                new_path: raw.new_path(),
                hunks: raw
                    .hunks
                    .iter()
                    .map(RawHunk::to_hunk)
                    .collect::<Result<Vec<_>, _>>()?,
            })
        })
        .collect()
}

/// Lazy iterator over single-hunk units of a patch. See [`split_patch`].
pub struct SplitPatch {
    lines: Vec<String>,
    message: String,
    pos: usize,
    headers: Option<(String, String)>,
    skip_block: bool,
    yielded: usize,
}

impl SplitPatch {
    fn view(&self) -> Vec<&str> {
        self.lines.iter().map(String::as_str).collect()
    }
}

impl Iterator for SplitPatch {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let (is_marker, is_git_header, is_hunk) = {
                let lines = self.view();
                if self.pos >= lines.len() {
                    if self.yielded == 0 && !lines.is_empty() {
                        warn!("patch split produced no hunks");
                    }
                    return None;
                }
                (
                    is_file_marker(&lines, self.pos),
                    lines[self.pos].starts_with("diff --git "),
                    lines[self.pos].starts_with("@@"),
                )
            };

            if is_git_header {
                self.headers = None;
                self.pos += 1;
                continue;
            }

            if is_marker {
                let old_line = self.lines[self.pos].clone();
                let new_line = self.lines[self.pos + 1].clone();
                self.skip_block =
                    header_path(&old_line, &new_line).is_some_and(|p| is_denylisted(&p));
                if self.skip_block {
                    debug!("skipping denylisted file block: {old_line}");
                }
                self.headers = Some((old_line, new_line));
                self.pos += 2;
                continue;
            }

            if !is_hunk {
                self.pos += 1;
                continue;
            }

            let hunk_start = self.pos;
            self.pos += 1;
            let end = {
                let lines = self.view();
                let mut end = self.pos;
                while end < lines.len() && !ends_hunk_body(&lines, end) {
                    end += 1;
                }
                end
            };
            self.pos = end;

            let Some((old_line, new_line)) = &self.headers else {
                debug!("hunk at line {} has no file header", hunk_start + 1);
                continue;
            };
            if self.skip_block {
                continue;
            }

            let mut unit = String::new();
            if !self.message.is_empty() {
                unit.push_str(&self.message);
                unit.push('\n');
            }
            unit.push_str(old_line);
            unit.push('\n');
            unit.push_str(new_line);
            unit.push('\n');
            unit.push_str(&self.lines[hunk_start..end].join("\n"));
            self.yielded += 1;
            return Some(unit);
        }
    }
}

/// Split `patch` into one unit per `(file, hunk)` pair.
///
/// Each unit carries its own `--- / +++` header lines. Blocks whose path is
/// denylisted are dropped. With `has_leading_message`, the text before the
/// first diff header is prepended verbatim to every unit. Input that cannot
/// be parsed simply yields nothing.
pub fn split_patch(patch: &str, has_leading_message: bool) -> SplitPatch {
    let lines: Vec<String> = patch.lines().map(ToString::to_string).collect();
    let message = if has_leading_message {
        let view: Vec<&str> = lines.iter().map(String::as_str).collect();
        view[..preamble_end(&view)].join("\n")
    } else {
        String::new()
    };
    SplitPatch {
        lines,
        message,
        pos: 0,
        headers: None,
        skip_block: false,
        yielded: 0,
    }
}
