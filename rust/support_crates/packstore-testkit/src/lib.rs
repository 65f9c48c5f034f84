//! Test utilities for the packstore crates.
//!
//! - Data generation: sample pack attribute schemas and random documents
//! - Directory management for on-disk segment and patch files

pub mod data_gen;
pub mod dirs;
