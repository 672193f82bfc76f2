//! Command-line interface for swe-gym.
//!
//! Provides commands for running evaluation cycles, preparing checkouts,
//! executing patches in a sandbox, and inspecting test reports.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
