//! Explanations for hunks whose context does not match the target file.

use crate::align::align;
use crate::diff::parser::scan_blocks;
use crate::repo::Repository;
use std::fmt::Write as _;
use tracing::debug;

/// Unchanged lines `git apply` wants on each side of a change.
pub const MIN_CONTEXT: usize = 3;

/// One context or removed line that differs from the real file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDifference {
    /// 1-based line number inside the submitted hunk text.
    pub patch_line: usize,
    pub patch_text: String,
    /// `None` when the aligned window runs past the end of the file.
    pub real_text: Option<String>,
}

/// Where in the real file the hunk most likely belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceWindow {
    pub path: String,
    /// 1-based line number of `lines[0]`.
    pub start_line: usize,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchReport {
    /// Path named by the hunk.
    pub path: String,
    pub rev: String,
    /// `None` if neither the file nor a similarly named one could be read.
    pub window: Option<SourceWindow>,
    pub differences: Vec<LineDifference>,
    /// Unchanged lines before and after the change, `None` if the hunk body
    /// is malformed.
    pub context: Option<(usize, usize)>,
}

impl MismatchReport {
    /// True if the window comes from a different file than the hunk names.
    pub fn is_relocated(&self) -> bool {
        self.window.as_ref().is_some_and(|w| w.path != self.path)
    }

    /// The real code around the aligned location.
    pub fn snippet(&self) -> String {
        let Some(window) = &self.window else {
            return format!(
                "File {} does not exist at {} and no similarly named file was found.\n",
                self.path, self.rev
            );
        };
        let mut out = String::new();
        if self.is_relocated() {
            let _ = writeln!(
                out,
                "{} does not exist at {}; the closest match is in {}.",
                self.path, self.rev, window.path
            );
        }
        let end = window.start_line + window.lines.len().saturating_sub(1);
        let _ = writeln!(
            out,
            "Here are lines {} through {} of file {} for commit {}.",
            window.start_line, end, window.path, self.rev
        );
        out.push_str("```code snippet\n");
        for line in &window.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("```\n");
        out
    }

    /// Line-by-line comparison of the hunk's context against the real file.
    pub fn comparison(&self) -> String {
        if self.window.is_none() {
            return String::new();
        }
        if self.differences.is_empty() {
            return match self.context {
                Some((leading, trailing)) if leading.min(trailing) < MIN_CONTEXT => format!(
                    "Your context lines match the source exactly, but the hunk keeps only \
                     {leading} unchanged line(s) before the change and {trailing} after it. \
                     Keep at least {MIN_CONTEXT} unchanged lines on each side.\n"
                ),
                _ => "Your context and removed lines match the source exactly, so the hunk most \
                      likely overlaps another change. View the surrounding code and resubmit \
                      the hunk with its real neighbourhood.\n"
                    .to_string(),
            };
        }
        let mut out = String::from("```context diff\n");
        for diff in &self.differences {
            let _ = writeln!(out, "On line {} of your patch:", diff.patch_line);
            let _ = writeln!(out, "          Your patch: {}", diff.patch_text);
            match &diff.real_text {
                Some(real) => {
                    let _ = writeln!(out, "Original source code: {real}");
                }
                None => out.push_str("Original source code: (end of file)\n"),
            }
        }
        out.push_str(
            "```\nRemove every one of these differences before submitting the patch again.\n",
        );
        out
    }
}

fn closest_window<R: Repository + ?Sized>(
    repo: &R,
    rev: &str,
    path: &str,
    expected: &[&str],
) -> Option<(String, Vec<String>, usize)> {
    if let Ok(Some(lines)) = repo.read_file(rev, path) {
        let found = align(expected, &lines, expected.len(), false);
        return Some((path.to_string(), lines, found.start_line));
    }

    let file_name = path.rsplit('/').next().unwrap_or(path);
    let mut best: Option<(String, Vec<String>, usize, usize)> = None;
    for candidate in repo.similar_files(file_name) {
        let Ok(Some(lines)) = repo.read_file(rev, &candidate) else {
            continue;
        };
        let found = align(expected, &lines, expected.len(), false);
        if best.as_ref().map_or(true, |(.., distance)| found.distance < *distance) {
            best = Some((candidate, lines, found.start_line, found.distance));
        }
    }
    best.map(|(path, lines, start, _)| (path, lines, start))
}

/// Explain why `unit`, a single-hunk patch, did not apply at `rev`.
///
/// Returns `None` if `unit` has no file header or hunk to explain.
pub fn context_mismatch<R: Repository + ?Sized>(
    repo: &R,
    rev: &str,
    unit: &str,
) -> Option<MismatchReport> {
    let (_, blocks) = scan_blocks(unit);
    let block = blocks.first()?;
    let hunk = block.hunks.first()?;
    let old_path = block.old_path();
    let new_path = block.new_path();
    let path = old_path.as_file().or_else(|| new_path.as_file())?.to_string();

    let header_idx = unit.lines().position(|l| l == hunk.header)?;
    let old_lines: Vec<(usize, &str)> = hunk
        .body
        .iter()
        .enumerate()
        .filter(|(_, line)| line.starts_with(' ') || line.starts_with('-'))
        .map(|(k, line)| (header_idx + 2 + k, &line[1..]))
        .collect();
    let expected: Vec<&str> = old_lines.iter().map(|(_, text)| *text).collect();
    let context = hunk
        .to_hunk()
        .ok()
        .map(|h| (h.leading_context(), h.trailing_context()));

    let Some((found_path, lines, start_line)) = closest_window(repo, rev, &path, &expected) else {
        debug!("no readable file for {path} at {rev}");
        return Some(MismatchReport {
            path,
            rev: rev.to_string(),
            window: None,
            differences: Vec::new(),
            context,
        });
    };

    let start = start_line.saturating_sub(1);
    let end = (start + expected.len() + 1).min(lines.len());
    let window = SourceWindow {
        path: found_path,
        start_line,
        lines: lines.get(start..end).unwrap_or_default().to_vec(),
    };

    let differences = old_lines
        .iter()
        .enumerate()
        .filter_map(|(j, (patch_line, text))| {
            let real = lines.get(start + j);
            (real.map(String::as_str) != Some(*text)).then(|| LineDifference {
                patch_line: *patch_line,
                patch_text: text.to_string(),
                real_text: real.cloned(),
            })
        })
        .collect();

    Some(MismatchReport {
        path,
        rev: rev.to_string(),
        window: Some(window),
        differences,
        context,
    })
}
