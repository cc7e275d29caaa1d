//! Structured view of a unified diff.
//!
//! A [`FileBlock`] owns the hunks for one `--- / +++` header pair, and each
//! [`Hunk`] owns its tagged [`Line`]s. Header counts are always derived from
//! the body via [`Hunk::recount`]; counts read from input are never trusted.

use std::fmt;

/// Path sentinel used by unified diffs for file creation and deletion.
pub const DEV_NULL: &str = "/dev/null";

/// One side of a file header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiffPath {
    /// A repository-relative path (without the `a/` or `b/` prefix).
    File(String),
    /// The `/dev/null` sentinel.
    DevNull,
}

impl DiffPath {
    /// Parse the text after `--- ` or `+++ `, stripping the given prefix.
    pub fn parse(raw: &str, prefix: &str) -> Self {
        let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
        if raw == DEV_NULL {
            return DiffPath::DevNull;
        }
        DiffPath::File(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
    }

    pub fn as_file(&self) -> Option<&str> {
        match self {
            DiffPath::File(path) => Some(path),
            DiffPath::DevNull => None,
        }
    }

    pub fn is_dev_null(&self) -> bool {
        matches!(self, DiffPath::DevNull)
    }

    /// Render as a header line (`--- a/path`, `+++ /dev/null`, ...).
    pub fn header_line(&self, marker: &str, prefix: &str) -> String {
        match self {
            DiffPath::File(path) => format!("{marker} {prefix}{path}"),
            DiffPath::DevNull => format!("{marker} {DEV_NULL}"),
        }
    }
}

/// Role of a hunk body line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Context,
    Added,
    Removed,
}

impl LineTag {
    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            ' ' => Some(LineTag::Context),
            '+' => Some(LineTag::Added),
            '-' => Some(LineTag::Removed),
            _ => None,
        }
    }

    pub fn prefix(self) -> char {
        match self {
            LineTag::Context => ' ',
            LineTag::Added => '+',
            LineTag::Removed => '-',
        }
    }

    /// Context and removed lines make up the expected old-file content.
    pub fn in_old(self) -> bool {
        matches!(self, LineTag::Context | LineTag::Removed)
    }

    /// Context and added lines make up the expected new-file content.
    pub fn in_new(self) -> bool {
        matches!(self, LineTag::Context | LineTag::Added)
    }
}

/// Marker git emits after a line that is not terminated by a newline.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub tag: LineTag,
    pub text: String,
    /// Followed by [`NO_NEWLINE_MARKER`] in the diff.
    pub no_newline: bool,
}

impl Line {
    pub fn new(tag: LineTag, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
            no_newline: false,
        }
    }

    pub fn context(text: impl Into<String>) -> Self {
        Self::new(LineTag::Context, text)
    }

    pub fn added(text: impl Into<String>) -> Self {
        Self::new(LineTag::Added, text)
    }

    pub fn removed(text: impl Into<String>) -> Self {
        Self::new(LineTag::Removed, text)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag.prefix(), self.text)?;
        if self.no_newline {
            write!(f, "\n{NO_NEWLINE_MARKER}")?;
        }
        Ok(())
    }
}

/// The `@@ -a,b +c,d @@trailer` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HunkHeader {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// Everything after the closing `@@`, usually the enclosing function.
    pub trailer: String,
}

impl fmt::Display for HunkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{},{} +{},{} @@{}",
            self.old_start, self.old_count, self.new_start, self.new_count, self.trailer
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub header: HunkHeader,
    pub lines: Vec<Line>,
}

impl Hunk {
    /// Recompute `old_count` and `new_count` from the body.
    pub fn recount(&mut self) {
        self.header.old_count = self.lines.iter().filter(|l| l.tag.in_old()).count();
        self.header.new_count = self.lines.iter().filter(|l| l.tag.in_new()).count();
    }

    /// Expected old-file content: context and removed lines, in order.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.tag.in_old())
            .map(|l| l.text.as_str())
            .collect()
    }

    /// Expected new-file content: context and added lines, in order.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.tag.in_new())
            .map(|l| l.text.as_str())
            .collect()
    }

    pub fn added_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.tag == LineTag::Added)
            .map(|l| l.text.as_str())
            .collect()
    }

    /// Number of unchanged lines before the first change.
    pub fn leading_context(&self) -> usize {
        self.lines
            .iter()
            .take_while(|l| l.tag == LineTag::Context)
            .count()
    }

    /// Number of unchanged lines after the last change.
    pub fn trailing_context(&self) -> usize {
        self.lines
            .iter()
            .rev()
            .take_while(|l| l.tag == LineTag::Context)
            .count()
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        for line in &self.lines {
            write!(f, "\n{line}")?;
        }
        Ok(())
    }
}

/// All hunks for one file header pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub old_path: DiffPath,
    pub new_path: DiffPath,
    pub hunks: Vec<Hunk>,
}

impl FileBlock {
    pub fn is_creation(&self) -> bool {
        self.old_path.is_dev_null()
    }

    pub fn header_lines(&self) -> [String; 2] {
        [
            self.old_path.header_line("---", "a/"),
            self.new_path.header_line("+++", "b/"),
        ]
    }
}

impl fmt::Display for FileBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [old, new] = self.header_lines();
        write!(f, "{old}\n{new}")?;
        for hunk in &self.hunks {
            write!(f, "\n{hunk}")?;
        }
        Ok(())
    }
}
