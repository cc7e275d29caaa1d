use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no `--- a/` or `--- /dev/null` file header found")]
    NoFileHeader,

    #[error("invalid hunk header: {line}")]
    InvalidHunkHeader { line: String },

    #[error("hunk body line {line_no} has no diff prefix: {line:?}")]
    MalformedLine { line_no: usize, line: String },
}
