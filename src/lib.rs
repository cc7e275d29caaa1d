//! Patch Backport: carry a fix from a newer revision of a repository back to
//! an older release.
//!
//! A fix commit is split into single-hunk units. Each unit is repaired
//! against the target file (fuzzy alignment of its context, recomputed
//! header), applied on a clean checkout, and on failure turned into text an
//! external decision-maker can act on. Once every hunk has landed, the
//! assembled patch goes through a gated apply, compile, test and
//! proof-of-concept pipeline.
//!
//! # Architecture
//!
//! - [`diff`]: unified-diff model, parser and hunk splitter
//! - [`align`]: edit-distance alignment of a block against a file
//! - [`repair`]: header and context repair of a single-hunk unit
//! - [`repo`]: the [`Repository`] seam, backed by `git` or held in memory
//! - [`hunk`]: one hunk attempt, including the relocation cascade
//! - [`pipeline`]: whole-patch validation stages
//! - [`tools`]: the text tool surface and the job driver
//!
//! All job state lives in a [`Session`] owned by the [`Backporter`] driving
//! the job; the working tree is reset before and after every attempt.
//!
//! # Example
//!
//! ```no_run
//! use patch_backport::{Backporter, GitRepository, JobRefs, Pipeline};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = GitRepository::open("/src/linux")?;
//! let refs = JobRefs {
//!     commit: "abc1234".to_string(),
//!     origin: "abc1234^".to_string(),
//!     target: "v5.15".to_string(),
//! };
//! let mut backporter = Backporter::new(repo, refs, Pipeline::default());
//! let pass = backporter.run_initial_pass()?;
//! for (idx, feedback) in pass.pending() {
//!     println!("hunk {idx} needs work:\n{feedback}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod config;
pub mod diagnostic;
pub mod diff;
pub mod history;
pub mod hunk;
pub mod log;
pub mod pipeline;
pub mod repair;
pub mod repo;
pub mod session;
pub mod tools;

// Re-exports
pub use align::{align, AlignmentResult, NO_MATCH};
pub use config::{load_from_path, load_from_str, ConfigError, JobConfig};
pub use diagnostic::MismatchReport;
pub use diff::{parse_patch, split_patch, ParseError};
pub use hunk::{HunkApplier, HunkFailure, HunkOutcome, Relocation};
pub use pipeline::{JobAborted, Pipeline, PipelineSettings, Procedure};
pub use repair::{repair, RepairOutcome};
pub use repo::{ApplyError, GitRepository, MemoryRepository, RepoError, Repository};
pub use session::{Phase, Session};
pub use tools::{Backporter, HunkStatus, InitialPass, JobRefs, ToolRequest, ToolResponse};
