//! Environment-driven settings.
//!
//! Values come from the process environment after `.env` has been loaded by the
//! binary. Library code receives a `Settings` value instead of reading the
//! environment itself.

use std::env;
use std::time::Duration;

pub const DEFAULT_LOCAL_HOMESERVER_URL: &str = "http://localhost:8008";
pub const DEFAULT_SYNAPSE_DOCKER_LABEL: &str = "org.homeserver=true";

/// Per-request timeout applied to every homeserver call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of retries after a timeout when a client is built directly.
pub const DEFAULT_MAX_TIMEOUTS: usize = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    /// `MATRIX_HOMESERVER_URL`
    pub homeserver_url: Option<String>,
    /// `MATRIX_ACCESS_TOKEN`
    pub access_token: Option<String>,
    /// `MATRIX_ID`
    pub matrix_id: Option<String>,
    /// `SYNAPSE_DOCKER_LABEL`, used to find the local Synapse container.
    pub synapse_docker_label: String,
    /// `TEST_HOMESERVER_URL`, only read by the integration tests.
    pub test_homeserver_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            homeserver_url: non_empty_var("MATRIX_HOMESERVER_URL"),
            access_token: non_empty_var("MATRIX_ACCESS_TOKEN"),
            matrix_id: non_empty_var("MATRIX_ID"),
            synapse_docker_label: non_empty_var("SYNAPSE_DOCKER_LABEL")
                .unwrap_or_else(|| DEFAULT_SYNAPSE_DOCKER_LABEL.to_string()),
            test_homeserver_url: non_empty_var("TEST_HOMESERVER_URL"),
        }
    }

    /// Homeserver used for Matrix IDs on `localhost`.
    pub fn local_homeserver_url(&self) -> &str {
        self.homeserver_url
            .as_deref()
            .unwrap_or(DEFAULT_LOCAL_HOMESERVER_URL)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}
