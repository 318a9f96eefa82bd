//! Scoped client lifecycle.
//!
//! `MatrixClient` collects connection settings, resolves the homeserver on
//! open, and guarantees the client is closed after use:
//!
//! ```no_run
//! # use fractal_matrix::api::MatrixClient;
//! # use fractal_matrix::config::Settings;
//! # async fn example() -> fractal_matrix::error::Result<()> {
//! let session = MatrixClient::builder(&Settings::from_env())
//!     .homeserver_url("http://localhost:8008")
//!     .build()?;
//! let _info = session
//!     .run(|client| Box::pin(async move { client.discovery_info().await }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::api::{get_homeserver_for_matrix_id, FractalClient};
use crate::config::Settings;
use crate::error::{AppError, Result};
use futures::future::BoxFuture;
use tracing::debug;

/// Connection settings for a scoped `FractalClient`.
#[derive(Debug, Clone)]
pub struct MatrixClient {
    homeserver_url: Option<String>,
    access_token: Option<String>,
    matrix_id: Option<String>,
    room_id: Option<String>,
    max_timeouts: usize,
    settings: Settings,
}

/// Builder for `MatrixClient`. Unset values fall back to `Settings`.
#[derive(Debug, Clone)]
pub struct MatrixClientBuilder {
    homeserver_url: Option<String>,
    access_token: Option<String>,
    matrix_id: Option<String>,
    room_id: Option<String>,
    max_timeouts: usize,
    settings: Settings,
}

impl MatrixClientBuilder {
    pub fn homeserver_url(mut self, url: impl Into<String>) -> Self {
        self.homeserver_url = Some(url.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn matrix_id(mut self, matrix_id: impl Into<String>) -> Self {
        self.matrix_id = Some(matrix_id.into());
        self
    }

    pub fn room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn max_timeouts(mut self, max_timeouts: usize) -> Self {
        self.max_timeouts = max_timeouts;
        self
    }

    /// Fails when neither a homeserver URL nor a Matrix ID is available.
    pub fn build(self) -> Result<MatrixClient> {
        let homeserver_url = self
            .homeserver_url
            .or_else(|| self.settings.homeserver_url.clone())
            .filter(|u| !u.is_empty());
        let matrix_id = self
            .matrix_id
            .or_else(|| self.settings.matrix_id.clone())
            .filter(|m| !m.is_empty());
        let access_token = self
            .access_token
            .or_else(|| self.settings.access_token.clone())
            .filter(|t| !t.is_empty());

        if homeserver_url.is_none() && matrix_id.is_none() {
            return Err(AppError::MissingConfig(
                "Environment variable MATRIX_HOMESERVER_URL and MATRIX_ID must be set if not \
                 passed explicitly to MatrixClient."
                    .to_string(),
            ));
        }

        Ok(MatrixClient {
            homeserver_url,
            access_token,
            matrix_id,
            room_id: self.room_id,
            max_timeouts: self.max_timeouts,
            settings: self.settings,
        })
    }
}

impl MatrixClient {
    pub fn builder(settings: &Settings) -> MatrixClientBuilder {
        MatrixClientBuilder {
            homeserver_url: None,
            access_token: None,
            matrix_id: None,
            room_id: None,
            max_timeouts: 0,
            settings: settings.clone(),
        }
    }

    pub fn homeserver_url(&self) -> Option<&str> {
        self.homeserver_url.as_deref()
    }

    pub fn matrix_id(&self) -> Option<&str> {
        self.matrix_id.as_deref()
    }

    /// Builds a ready client, discovering the homeserver from the Matrix ID if needed.
    ///
    /// Without an access token the client's `user` is set to the Matrix ID so
    /// that `login` can be called straight away.
    pub async fn open(&self) -> Result<FractalClient> {
        let homeserver_url = match (&self.homeserver_url, &self.matrix_id) {
            (Some(url), _) => url.clone(),
            (None, Some(matrix_id)) => {
                get_homeserver_for_matrix_id(matrix_id, &self.settings)
                    .await?
                    .0
            },
            (None, None) => {
                return Err(AppError::MissingConfig(
                    "no homeserver URL or Matrix ID configured".to_string(),
                ))
            },
        };
        debug!("Opening Matrix client for {}", homeserver_url);

        let mut client = FractalClient::new(
            &homeserver_url,
            self.access_token.clone(),
            self.room_id.clone(),
            self.max_timeouts,
        )?;
        if self.access_token.is_none() {
            if let Some(matrix_id) = &self.matrix_id {
                client.set_user(matrix_id.clone());
            }
        }
        Ok(client)
    }

    /// Opens a client, hands it to `f`, and closes it whether or not `f` succeeded.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut FractalClient) -> BoxFuture<'c, Result<T>>,
    {
        let mut client = self.open().await?;
        let result = f(&mut client).await;
        client.close();
        result
    }
}
