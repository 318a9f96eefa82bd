//! Handles Command Line Interface (CLI) related functionalities.
//!
//! Includes the clap command tree, the `App` that executes commands against a
//! homeserver, and helpers for the local Synapse container.

mod commands;
mod docker;

pub use commands::*;
