//! Subcommand implementations

pub mod status;
pub mod thresholds;
pub mod versions;
