//! Convenience wrapper around the Matrix client-server API.
//!
//! - `api`: `FractalClient`, homeserver discovery, scoped sessions and the Synapse admin client.
//! - `models`: Matrix IDs and wire types.
//! - `store`: YAML user data (saved credentials).
//! - `cli`: the `fractal` command tree.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
