//! Defines the data structures and models used throughout the crate.
//!
//! This covers Matrix identifiers, request and response bodies exchanged with
//! the homeserver, and the credentials persisted by the CLI.

mod matrix;

pub use matrix::*;
