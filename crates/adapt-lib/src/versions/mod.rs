//! Trained model versions
//!
//! This module provides:
//! - A filesystem registry of immutable versions with checksummed artifacts
//! - Retention of the newest versions per family
//! - Matching of a drift reference set against stored training snapshots

mod matcher;
mod store;

pub use matcher::{select_version, MatchOutcome, VersionMatcher};
pub(crate) use store::write_file;
pub use store::{
    compute_checksum, ModelVersion, RetentionPolicy, VersionStore, DEFAULT_VERSIONS_TO_KEEP,
};
