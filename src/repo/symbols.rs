//! Symbol lookup from a ctags index.

use super::{RepoError, Repository};
use crate::align::most_similar_name;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

static SYMBOL_BEFORE_BRACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\w+)\s*[{(]").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolLocation {
    pub path: String,
    pub line: usize,
}

impl fmt::Display for SymbolLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

/// Symbol name to definition sites, for one revision.
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    symbols: BTreeMap<String, Vec<SymbolLocation>>,
}

impl SymbolIndex {
    /// Parse `ctags --excmd=number` output. Pseudo-tags and lines that do
    /// not have the `name<TAB>file<TAB>line;"` shape are ignored.
    pub fn from_ctags(output: &str) -> Self {
        let mut symbols: BTreeMap<String, Vec<SymbolLocation>> = BTreeMap::new();
        for line in output.lines() {
            if line.starts_with("!_TAG_") {
                continue;
            }
            let entry = line.split(";\"").next().unwrap_or(line);
            let fields: Vec<&str> = entry.split('\t').collect();
            let &[name, path, line_no] = fields.as_slice() else {
                continue;
            };
            let Ok(line_no) = line_no.trim().parse() else {
                continue;
            };
            symbols.entry(name.to_string()).or_default().push(SymbolLocation {
                path: path.strip_prefix("./").unwrap_or(path).to_string(),
                line: line_no,
            });
        }
        Self { symbols }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn locate(&self, symbol: &str) -> Option<&[SymbolLocation]> {
        self.symbols.get(symbol).map(Vec::as_slice)
    }

    /// The known symbol closest to `symbol` by edit distance, with its sites.
    pub fn most_similar(&self, symbol: &str) -> Option<(&str, &[SymbolLocation])> {
        let (name, _) = most_similar_name(symbol, self.symbols.keys().map(String::as_str))?;
        self.symbols
            .get_key_value(name)
            .map(|(name, sites)| (name.as_str(), sites.as_slice()))
    }
}

/// Lazily built [`SymbolIndex`] per revision. Building one means checking
/// the revision out, so it happens at most once per revision and job.
#[derive(Debug, Default)]
pub struct SymbolCache {
    by_rev: HashMap<String, SymbolIndex>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build<R: Repository + ?Sized>(
        &mut self,
        repo: &R,
        rev: &str,
    ) -> Result<&SymbolIndex, RepoError> {
        match self.by_rev.entry(rev.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let index = repo.symbol_index(rev)?;
                debug!(rev, symbols = index.len(), "built symbol index");
                Ok(entry.insert(index))
            }
        }
    }
}

/// Best-effort guess of the function or type a hunk sits in: the identifier
/// right before the first `{` or `(` of its `@@` line.
///
/// Misses multi-token declarations such as `struct foo bar =` and headers
/// whose trailer is empty; callers treat `None` as "no symbol".
pub fn extract_symbol(hunk_header: &str) -> Option<&str> {
    SYMBOL_BEFORE_BRACE
        .captures(hunk_header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
