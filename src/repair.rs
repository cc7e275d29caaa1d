//! Patch repair: turn a stale or sloppy hunk into one that matches the
//! target file.
//!
//! Repair fixes, per file block:
//! 1. non-canonical header paths (`a/./x//y.c`),
//! 2. body lines without a diff prefix (coerced to context lines),
//! 3. context/removed lines that drifted from the real file, and
//! 4. hunk header positions and counts.
//!
//! Repair is best-effort. A block that cannot be repaired is returned as it
//! came in, and creations (`--- /dev/null`) are never touched because there
//! is nothing to align against.

use crate::align::align;
use crate::diff::parser::{parse_hunk_header, scan_blocks, RawBlock, RawHunk};
use crate::diff::{DiffPath, Hunk, Line, LineTag, ParseError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RepairError {
    #[error("hunk header could not be parsed: {0}")]
    Header(#[from] ParseError),
}

/// Result of [`repair`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "RepairOutcome carries the repaired text"]
pub struct RepairOutcome {
    pub text: String,
    /// True if paths, body structure or header numbers had to change.
    pub modified: bool,
}

/// Lexically canonicalise a diff path: drop `.` and empty components and
/// resolve `..` where possible.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

fn without_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Repair every file block in `patch_unit`.
///
/// `read_file` returns the target revision's lines for a path, or `None` if
/// the file does not exist there. With `force_context_rewrite`, every
/// context and removed line is replaced by the real file text.
///
/// Any text before the first file header is not carried over.
pub fn repair<F>(patch_unit: &str, mut read_file: F, force_context_rewrite: bool) -> RepairOutcome
where
    F: FnMut(&str) -> Option<Vec<String>>,
{
    let (_, blocks) = scan_blocks(patch_unit);
    if blocks.is_empty() {
        debug!("nothing to repair: no file header in patch");
        return RepairOutcome {
            text: patch_unit.to_string(),
            modified: false,
        };
    }

    let mut rendered = Vec::with_capacity(blocks.len());
    let mut modified = false;
    for block in &blocks {
        match repair_block(block, &mut read_file, force_context_rewrite) {
            Ok((text, block_modified)) => {
                rendered.push(text);
                modified |= block_modified;
            }
            Err(e) => {
                warn!("failed to repair block {}: {e}", block.old_header);
                rendered.push(render_raw_block(block));
            }
        }
    }

    RepairOutcome {
        text: rendered.join("\n") + "\n",
        modified,
    }
}

fn render_raw_block(block: &RawBlock) -> String {
    let mut out = vec![block.old_header.clone(), block.new_header.clone()];
    for hunk in &block.hunks {
        out.push(hunk.header.clone());
        out.extend(hunk.body.iter().cloned());
    }
    out.join("\n")
}

fn normalized(path: DiffPath) -> DiffPath {
    match path {
        DiffPath::File(p) => DiffPath::File(normalize_path(&p)),
        DiffPath::DevNull => DiffPath::DevNull,
    }
}

fn repair_block<F>(
    block: &RawBlock,
    read_file: &mut F,
    force: bool,
) -> Result<(String, bool), RepairError>
where
    F: FnMut(&str) -> Option<Vec<String>>,
{
    let old_path = normalized(block.old_path());
    let new_path = normalized(block.new_path());
    let old_header = old_path.header_line("---", "a/");
    let new_header = new_path.header_line("+++", "b/");
    let paths_fixed = old_header != block.old_header || new_header != block.new_header;

    let Some(path) = old_path.as_file() else {
        let mut out = vec![old_header, new_header];
        for hunk in &block.hunks {
            out.push(hunk.header.clone());
            out.extend(hunk.body.iter().cloned());
        }
        return Ok((out.join("\n"), paths_fixed));
    };

    let Some(file_lines) = read_file(path) else {
        debug!("{path} not found at target; leaving block for relocation");
        return Ok((render_raw_block(block), false));
    };

    let mut out = vec![old_header, new_header];
    let mut modified = paths_fixed;
    let mut line_delta: isize = 0;
    for raw in &block.hunks {
        let (hunk, hunk_modified) = repair_hunk(raw, &file_lines, force, line_delta)?;
        line_delta += hunk.header.new_count as isize - hunk.header.old_count as isize;
        modified |= hunk_modified;
        out.push(hunk.to_string());
    }
    Ok((out.join("\n"), modified))
}

/// Turn raw body lines into tagged lines, coercing anything without a diff
/// prefix into a context line. Returns the lines and whether any coercion
/// happened.
fn coerce_body(body: &[String]) -> (Vec<Line>, bool) {
    let mut body: Vec<&String> = body.iter().collect();
    if body.last().is_some_and(|last| last.is_empty()) {
        body.pop();
    }

    let mut coerced = false;
    let mut lines: Vec<Line> = Vec::with_capacity(body.len());
    for raw in body {
        if raw.starts_with('\\') {
            match lines.last_mut() {
                Some(last) => last.no_newline = true,
                None => coerced = true,
            }
            continue;
        }
        let mut chars = raw.chars();
        match chars.next().and_then(LineTag::from_prefix) {
            Some(LineTag::Added) => lines.push(Line::added(chars.as_str().replace("'s ", "->"))),
            Some(tag) => lines.push(Line::new(tag, chars.as_str())),
            None => {
                // Blank lines are usually context whose space was stripped.
                coerced |= !raw.is_empty();
                lines.push(Line::context(raw.as_str()));
            }
        }
    }
    (lines, coerced)
}

fn repair_hunk(
    raw: &RawHunk,
    file_lines: &[String],
    force: bool,
    line_delta: isize,
) -> Result<(Hunk, bool), RepairError> {
    let original = parse_hunk_header(&raw.header)?;
    let (lines, coerced) = coerce_body(&raw.body);

    let expected: Vec<&str> = lines
        .iter()
        .filter(|l| l.tag.in_old())
        .map(|l| l.text.as_str())
        .collect();
    let alignment = align(&expected, file_lines, expected.len(), false);
    let start = alignment.start_index();
    debug!(
        start_line = alignment.start_line,
        distance = alignment.distance,
        "aligned hunk {}",
        raw.header
    );

    let mut revised = Vec::with_capacity(lines.len() + 1);
    let mut offset = 0;
    for line in &lines {
        if !line.tag.in_old() {
            revised.push(line.clone());
            continue;
        }
        let real = file_lines.get(start + offset);
        offset += 1;
        let replacement = match real {
            Some(real) if force => Line::context(real.as_str()),
            Some(real) if without_whitespace(&line.text) == without_whitespace(real) => {
                Line::new(line.tag, real.as_str())
            }
            _ => line.clone(),
        };
        revised.push(Line {
            no_newline: line.no_newline,
            ..replacement
        });
    }

    if force {
        debug!("forcing context rewrite for {}", raw.header);
        reanchor_removed_lines(&lines, &mut revised);
        if revised
            .last()
            .is_some_and(|l| l.tag != LineTag::Context && !l.no_newline)
        {
            if let Some(real) = file_lines.get(start + offset) {
                revised.push(Line::context(real.as_str()));
            }
        }
    }

    let mut hunk = Hunk {
        header: original.clone(),
        lines: revised,
    };
    hunk.recount();
    if !expected.is_empty() && alignment.is_found() {
        hunk.header.old_start = alignment.start_line;
        hunk.header.new_start = (alignment.start_line as isize + line_delta).max(0) as usize;
    }

    let modified = coerced || hunk.header != original;
    Ok((hunk, modified))
}

/// After a forced rewrite every old line is context, so the removals have to
/// be put back. Each removed line is located by a single-line search at or
/// after the previous removal. Assumes removals keep their real-file order.
fn reanchor_removed_lines(original: &[Line], revised: &mut [Line]) {
    let mut next = 0;
    for removed in original.iter().filter(|l| l.tag == LineTag::Removed) {
        if next >= revised.len() {
            break;
        }
        let candidates: Vec<String> = revised[next..]
            .iter()
            .map(|l| format!("{}{}", l.tag.prefix(), l.text))
            .collect();
        let pattern = [format!(" {}", removed.text)];
        let found = align(&pattern, &candidates, 1, true);
        if !found.is_found() {
            continue;
        }
        let idx = next + found.start_index();
        revised[idx].tag = LineTag::Removed;
        next = idx + 1;
    }
}
