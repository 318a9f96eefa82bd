//! Provides on-disk persistence for user data.
//!
//! Currently this is a single YAML-backed store under the user's data directory.

mod user_data;

pub use user_data::*;
