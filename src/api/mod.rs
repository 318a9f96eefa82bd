//! Provides clients and utilities for interacting with Matrix homeservers.
//!
//! Includes:
//! - `client`: `FractalClient`, the async client-server API wrapper.
//! - `discovery`: homeserver lookup from a Matrix ID.
//! - `session`: `MatrixClient`, a scoped open/run/close lifecycle.
//! - `admin`: `MatrixAdminClient` for Synapse user management.

mod admin;
mod client;
mod discovery;
mod session;

#[cfg(test)]
mod client_test;

pub use admin::*;
pub use client::*;
pub use discovery::*;
pub use session::*;
