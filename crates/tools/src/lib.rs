//! Batch experiment tooling for MixForge.
//!
//! The `gridgen` binary expands a base run config against parameter grids:
//! one JSON config plus one launch command per combination in the Cartesian
//! product, collected into a shell script.

pub mod config;
pub mod grid;

pub use config::ToolConfig;
pub use grid::{expand_grid, GridSpec, GridSummary, Shell};
