//! Defines the crate's primary error type `AppError` and a convenience `Result` alias.
//!
//! Uses the `thiserror` crate for ergonomic error definition and provides `From`
//! implementations to convert common external errors into `AppError` variants.
//! Errors that do not implement `Clone` are wrapped in `Arc` to allow `AppError` to be cloneable.

use std::sync::Arc;
use thiserror::Error;

/// The primary error enumeration for all crate-specific errors.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Transport-level failure from the HTTP client (`reqwest`).
    #[error("API Error: {0}")]
    Api(Arc<reqwest::Error>),

    /// The homeserver answered with a Matrix error body.
    #[error("Matrix Error ({status}) {errcode}: {message}")]
    Matrix {
        status: u16,
        errcode: String,
        message: String,
    },

    /// Non-success response that carried no Matrix error body (e.g. Synapse admin endpoints).
    #[error("HTTP Error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Your Matrix server's .well-known/matrix/client was not found.")]
    WellKnownNotFound,

    #[error("Unknown Error: {0}")]
    UnknownDiscoveryInfo(String),

    #[error("{0} is not a valid Matrix ID.")]
    InvalidMatrixId(String),

    /// A required setting was neither passed explicitly nor found in the environment.
    #[error("Configuration Error: {0}")]
    MissingConfig(String),

    #[error("Failed to get latest sync token{}", .0.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    GetLatestSyncToken(Option<String>),

    #[error("Login Error: {0}")]
    Login(String),

    #[error("You are not logged in.")]
    NotLoggedIn,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failure talking to the local Docker daemon.
    #[error("Docker Error: {0}")]
    Docker(String),

    #[error("URL Error: {0}")]
    Url(#[from] url::ParseError),

    /// Error during JSON parsing (`serde_json`). Wrapped in Arc as serde_json::Error is not Clone.
    #[error("JSON Parsing Error: {0}")]
    JsonParse(Arc<serde_json::Error>),

    /// Error reading or writing YAML user data (`serde_yaml`).
    #[error("YAML Error: {0}")]
    Yaml(Arc<serde_yaml::Error>),

    /// Error related to standard I/O operations.
    #[error("I/O Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Error specific to CLI logic or argument handling.
    #[error("CLI Error: {0}")]
    Cli(String),

    /// Error originating from user interaction prompts (`dialoguer`).
    #[error("Dialoguer Error: {0}")]
    Dialoguer(Arc<dialoguer::Error>),

    /// Error related to progress bar style templating (`indicatif`).
    #[error("Progress Style Template Error: {0}")]
    Template(Arc<indicatif::style::TemplateError>),
}

/// A specialized `Result` type using the crate's `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Api(Arc::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(Arc::new(err))
    }
}

impl From<dialoguer::Error> for AppError {
    fn from(err: dialoguer::Error) -> Self {
        AppError::Dialoguer(Arc::new(err))
    }
}

impl From<indicatif::style::TemplateError> for AppError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        AppError::Template(Arc::new(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::JsonParse(Arc::new(err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Yaml(Arc::new(err))
    }
}
