//! Integration tests for the backport engine.
//!
//! `tool_surface` and `pipeline_scripts` drive the engine through the
//! in-memory repository; `git_fixture` runs a whole job against a real
//! throwaway git repository when `git` is installed.

mod git_fixture;
mod pipeline_scripts;
mod properties;
mod tool_surface;
