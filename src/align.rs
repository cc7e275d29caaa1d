//! Fuzzy alignment of expected line blocks against real file content.
//!
//! Whole-block edit distance finds the neighbourhood; a second pass anchors
//! on one exactly matching line to recover the precise offset.

use std::path::Path;
use strsim::levenshtein;
use walkdir::WalkDir;

/// Distance reported when no window could be scored at all.
pub const NO_MATCH: usize = usize::MAX;

/// How far around the chosen window the offset pass looks.
const OFFSET_RADIUS: isize = 5;

/// Lines shorter than this (ignoring whitespace) are too generic to anchor on.
const MIN_ANCHOR_CHARS: usize = 3;

/// Number of candidates returned by [`most_similar_files`].
pub const SIMILAR_FILES: usize = 5;

/// Best-effort location of a block inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentResult {
    /// 1-based line number where the block starts.
    pub start_line: usize,
    /// Edit distance between the block and the chosen window.
    pub distance: usize,
}

impl AlignmentResult {
    /// False when the candidate had no eligible window.
    pub fn is_found(&self) -> bool {
        self.distance != NO_MATCH
    }

    /// 0-based index of the first aligned line.
    pub fn start_index(&self) -> usize {
        self.start_line.saturating_sub(1)
    }
}

fn non_whitespace_chars(line: &str) -> usize {
    line.chars().filter(|c| !c.is_whitespace()).count()
}

fn looks_mutated(line: &str) -> bool {
    line.starts_with('+') || line.starts_with('-')
}

/// Find the window of `candidate` that best matches `expected`.
///
/// Windows are `expected_len` lines long and scored by the edit distance
/// between the joined block and the joined window; the first minimum wins.
/// With `exclude_mutated_lines`, windows starting on a `+`/`-` line are
/// skipped and the offset pass is disabled.
pub fn align<E, C>(
    expected: &[E],
    candidate: &[C],
    expected_len: usize,
    exclude_mutated_lines: bool,
) -> AlignmentResult
where
    E: AsRef<str>,
    C: AsRef<str>,
{
    if expected_len == 0 {
        return AlignmentResult {
            start_line: 1,
            distance: 0,
        };
    }

    let pattern = expected
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n");

    let mut best = AlignmentResult {
        start_line: 1,
        distance: NO_MATCH,
    };

    if candidate.len() >= expected_len {
        for i in 0..=(candidate.len() - expected_len) {
            if exclude_mutated_lines && looks_mutated(candidate[i].as_ref()) {
                continue;
            }
            let window = candidate[i..i + expected_len]
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join("\n");
            let distance = levenshtein(&window, &pattern);
            if distance < best.distance {
                best = AlignmentResult {
                    start_line: i + 1,
                    distance,
                };
                if distance == 0 {
                    break;
                }
            }
        }
    }

    if !exclude_mutated_lines && best.is_found() {
        if let Some(offset) = anchor_offset(expected, candidate, best.start_index(), expected_len) {
            let shifted = best.start_index() as isize + offset;
            if shifted >= 0 {
                best.start_line = shifted as usize + 1;
            }
        }
    }

    best
}

/// Smallest-magnitude shift that puts some meaningful expected line exactly
/// (trimmed) onto a real line near its aligned position.
fn anchor_offset<E, C>(
    expected: &[E],
    candidate: &[C],
    start: usize,
    expected_len: usize,
) -> Option<isize>
where
    E: AsRef<str>,
    C: AsRef<str>,
{
    let mut best: Option<isize> = None;
    for (i, line) in expected.iter().take(expected_len).enumerate() {
        let line = line.as_ref();
        if non_whitespace_chars(line) < MIN_ANCHOR_CHARS {
            continue;
        }
        let wanted = line.trim();
        let expected_pos = (start + i) as isize;
        for k in -OFFSET_RADIUS..=OFFSET_RADIUS {
            let pos = expected_pos + k;
            if pos < 0 || pos as usize >= candidate.len() {
                continue;
            }
            if candidate[pos as usize].as_ref().trim() == wanted
                && best.map_or(true, |b| k.abs() < b.abs())
            {
                best = Some(k);
            }
        }
        if best == Some(0) {
            break;
        }
    }
    best
}

/// Closest name to `target` by edit distance; ties keep the first.
pub fn most_similar_name<'a, I>(target: &str, names: I) -> Option<(&'a str, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .map(|name| (name, levenshtein(target, name)))
        .min_by_key(|(_, distance)| *distance)
}

/// The [`SIMILAR_FILES`] repository files whose file name is closest to
/// `file_name`, as paths relative to `root`. `.git` is never searched.
pub fn most_similar_files(file_name: &str, root: &Path) -> Vec<String> {
    let mut scored: Vec<(usize, String)> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let name = entry.file_name().to_string_lossy();
            Some((
                levenshtein(file_name, &name),
                relative.to_string_lossy().replace('\\', "/"),
            ))
        })
        .collect();
    scored.sort_by_key(|(distance, _)| *distance);
    scored
        .into_iter()
        .take(SIMILAR_FILES)
        .map(|(_, path)| path)
        .collect()
}
