//! Unified-diff model and parser.

pub mod errors;
pub mod model;
pub mod parser;

pub use errors::ParseError;
pub use model::{DiffPath, FileBlock, Hunk, HunkHeader, Line, LineTag, DEV_NULL, NO_NEWLINE_MARKER};
pub use parser::{
    is_denylisted, parse_hunk_header, parse_patch, scan_blocks, split_patch, RawBlock, RawHunk,
    SplitPatch, DENYLIST,
};
